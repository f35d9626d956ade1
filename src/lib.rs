#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! Multi-channel audio mixer for emulated sound devices.
//!
//! Each emulated device owns a [`MixerChannel`](channel::MixerChannel) and
//! pushes samples in its native rate and format. The
//! [`MixerContext`](engine::MixerContext) pulls every channel once per block,
//! converts everything to the output rate, runs the per-channel and master
//! effect chains and hands fixed-size blocks to an [`AudioHost`](host::AudioHost)
//! and, when recording, to a capture queue.

use std::collections::VecDeque;
use std::sync::Once;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

pub mod channel;
pub mod config;
/// Status API and terminal console.
pub mod control;
pub mod convert;
pub mod effects;
pub mod engine;
pub mod envelope;
pub mod filter;
pub mod frame;
pub mod host;
pub mod lock;
pub mod queue;
pub mod registry;
pub mod resample;
pub mod sleeper;


pub use channel::{ChannelSettings, MixerChannel, MixerChannelPtr, USE_MIXER_RATE};
pub use config::MixerConfig;
pub use engine::{MixerContext, MixerState};
pub use frame::{AudioFrame, ChannelFeature, StereoLine};

const NOTIFICATION_CAPACITY: usize = 256;

static NOTIFICATIONS: Lazy<Mutex<VecDeque<Notification>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(64)));
static TRACING_INIT: Once = Once::new();

/// Errors reported by configuration calls and engine start-up.
#[derive(Debug, Error)]
pub enum MixerError {
    /// Custom filter string did not match `lpf|hpf ORDER CUTOFF`.
    #[error("invalid custom filter definition '{0}'")]
    InvalidFilter(String),
    /// Filter order outside 1..=16 or not a number.
    #[error("invalid {filter} filter order '{value}'")]
    InvalidFilterOrder {
        /// Filter being configured.
        filter: String,
        /// Offending value.
        value: String,
    },
    /// Filter cutoff not a positive number.
    #[error("invalid {filter} filter cutoff frequency '{value}'")]
    InvalidFilterCutoff {
        /// Filter being configured.
        filter: String,
        /// Offending value.
        value: String,
    },
    /// Filter type other than `lpf` or `hpf`.
    #[error("invalid custom filter type '{0}'")]
    InvalidFilterType(String),
    /// Both custom filters named the same type.
    #[error("duplicate filter types in '{0}'")]
    DuplicateFilter(String),
    /// Fade-out preference could not be parsed or was out of range.
    #[error("invalid fade-out definition '{0}'")]
    InvalidFadeOut(String),
    /// Preset or boolean setting not recognised.
    #[error("invalid '{setting}' setting: '{value}'")]
    InvalidPreset {
        /// Setting name.
        setting: String,
        /// Offending value.
        value: String,
    },
    /// Host device could not be opened.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Resampler construction or processing failed.
    #[error("resampler error: {0}")]
    Resampler(String),
    /// The engine thread could not be started.
    #[error("failed to spawn mixer thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    /// No live channel has this name.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
}

/// A user-visible warning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Channel name or `MIXER`.
    pub source: String,
    /// Warning text.
    pub message: String,
}

/// Install the `tracing` fmt subscriber once; later calls do nothing.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Log a warning and keep it for UIs, dropping the oldest past 256 entries.
pub fn notify_warning(source: &str, message: impl Into<String>) {
    let message = message.into();
    warn!("{source}: {message}");
    let mut guard = NOTIFICATIONS.lock();
    guard.push_back(Notification {
        source: source.to_string(),
        message,
    });
    while guard.len() > NOTIFICATION_CAPACITY {
        guard.pop_front();
    }
}

/// Take the oldest pending notification.
pub fn pop_notification() -> Option<Notification> {
    NOTIFICATIONS.lock().pop_front()
}

/// Per-channel diagnostics exposed to control surfaces.
#[derive(Clone, Debug)]
pub struct ChannelStatus {
    /// Channel name.
    pub name: String,
    /// Native rate in Hz.
    pub sample_rate_hz: u32,
    /// Whether the channel is producing audio.
    pub is_enabled: bool,
    /// User gain pair.
    pub user_volume: AudioFrame,
    /// `mono`, `stereo` or `reverse`.
    pub lineout: String,
    /// Crossfeed strength.
    pub crossfeed_strength: f32,
    /// Reverb send level.
    pub reverb_level: f32,
    /// Chorus send level.
    pub chorus_level: f32,
    /// Active resampling stages.
    pub rate_path: String,
    /// Peak of the frames mixed in the last block, in the canonical domain.
    pub peak: f32,
}

/// Aggregated mixer status snapshot used by control surfaces.
#[derive(Clone, Debug)]
pub struct MixerStatus {
    /// Output rate in Hz.
    pub sample_rate_hz: u32,
    /// Frames per block.
    pub blocksize: u32,
    /// Effective prebuffer in milliseconds.
    pub prebuffer_ms: u32,
    /// Output state.
    pub state: MixerState,
    /// Whether the user muted by hand.
    pub manually_muted: bool,
    /// Whether fast-forward is on.
    pub fast_forward: bool,
    /// Master gain pair.
    pub master_volume: AudioFrame,
    /// Master compressor on or off.
    pub compressor: bool,
    /// Crossfeed preset name.
    pub crossfeed: String,
    /// Reverb preset name.
    pub reverb: String,
    /// Chorus preset name.
    pub chorus: String,
    /// Host queue fill (0-1).
    pub queue_fill: f32,
    /// Peak of the last mixed block in the host range.
    pub peak: f32,
    /// Per-channel diagnostics.
    pub channels: Vec<ChannelStatus>,
}
