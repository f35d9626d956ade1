//! Per-channel sleep and fade-out controller.
//!
//! Channels declaring the sleep capability are switched off after a period
//! without signal changes, or faded to silence first when fade-out is
//! configured. Devices wake the channel again whenever they might produce
//! new audio.

use std::time::Instant;

use once_cell::sync::Lazy;
use tracing::info;

use crate::config::parse_bool_setting;
use crate::frame::AudioFrame;
use crate::{MixerError, notify_warning};

/// Default wait before sleeping or fading, in milliseconds.
pub const DEFAULT_WAIT_MS: u32 = 500;
/// Shortest configurable wait.
pub const MIN_WAIT_MS: u32 = 100;
/// Longest configurable wait.
pub const MAX_WAIT_MS: u32 = 5000;
/// Shortest configurable fade.
pub const MIN_FADE_MS: u32 = 10;
/// Longest configurable fade.
pub const MAX_FADE_MS: u32 = 3000;

/// Per-side difference that counts as signal.
const CHANGE_THRESHOLD: f32 = 1.0;

static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds on a process-wide monotonic clock.
pub fn monotonic_ms() -> u64 {
    CLOCK_ORIGIN.elapsed().as_millis() as u64
}

/// Sleep state machine for one channel.
#[derive(Clone, Debug)]
pub struct Sleeper {
    wait_ms: u32,
    fade_decrement_per_ms: f32,
    wants_fadeout: bool,
    woken_at_ms: u64,
    fade_level: f32,
    had_signal: bool,
    last_frame: AudioFrame,
}

impl Default for Sleeper {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_MS)
    }
}

impl Sleeper {
    /// Listening sleeper with the given wait period.
    pub fn new(wait_ms: u32) -> Self {
        debug_assert!((MIN_WAIT_MS..=MAX_WAIT_MS).contains(&wait_ms));
        Self {
            wait_ms: wait_ms.clamp(MIN_WAIT_MS, MAX_WAIT_MS),
            fade_decrement_per_ms: 0.0,
            wants_fadeout: false,
            woken_at_ms: monotonic_ms(),
            fade_level: 1.0,
            had_signal: false,
            last_frame: AudioFrame::ZERO,
        }
    }

    /// Wait period in milliseconds.
    pub fn wait_ms(&self) -> u32 {
        self.wait_ms
    }

    /// Whether fading is configured.
    pub fn wants_fadeout(&self) -> bool {
        self.wants_fadeout
    }

    /// Current fade multiplier.
    pub fn fade_level(&self) -> f32 {
        self.fade_level
    }

    /// Whether a signal change was seen since the last wake-up.
    pub fn had_signal(&self) -> bool {
        self.had_signal
    }

    /// Configure fading from `on`/`off` or a `"WAIT FADE"` pair of milliseconds.
    ///
    /// Invalid input disables fading and raises a warning.
    pub fn configure_fade_out(&mut self, name: &str, prefs: &str) -> Result<(), MixerError> {
        match parse_bool_setting(prefs) {
            Some(false) => {
                self.wants_fadeout = false;
                return Ok(());
            }
            Some(true) => {
                self.set_wait_and_fade(name, DEFAULT_WAIT_MS, DEFAULT_WAIT_MS);
                return Ok(());
            }
            None => {}
        }

        let parts: Vec<&str> = prefs.split_whitespace().collect();
        if let [wait, fade] = parts.as_slice() {
            if let (Ok(wait_ms), Ok(fade_ms)) = (wait.parse::<i64>(), fade.parse::<i64>()) {
                let wait_valid =
                    (i64::from(MIN_WAIT_MS)..=i64::from(MAX_WAIT_MS)).contains(&wait_ms);
                let fade_valid =
                    (i64::from(MIN_FADE_MS)..=i64::from(MAX_FADE_MS)).contains(&fade_ms);
                if wait_valid && fade_valid {
                    self.set_wait_and_fade(name, wait_ms as u32, fade_ms as u32);
                    return Ok(());
                }
            }
        }

        notify_warning(
            name,
            format!(
                "Invalid custom fade-out '{prefs}': expected 'on', 'off', or 'WAIT FADE' \
                 with WAIT in {MIN_WAIT_MS}..={MAX_WAIT_MS} ms and FADE in \
                 {MIN_FADE_MS}..={MAX_FADE_MS} ms; fade-out disabled"
            ),
        );
        self.wants_fadeout = false;
        Err(MixerError::InvalidFadeOut(prefs.to_string()))
    }

    fn set_wait_and_fade(&mut self, name: &str, wait_ms: u32, fade_ms: u32) {
        self.wait_ms = wait_ms;
        self.fade_decrement_per_ms = 1.0 / fade_ms as f32;
        self.wants_fadeout = true;
        info!("{name}: Fade-out enabled (wait {wait_ms} ms then fade for {fade_ms} ms)");
    }

    /// Fade the frame, or note whether it differs from the last one.
    #[inline]
    pub fn maybe_fade_or_listen(&mut self, frame: AudioFrame) -> AudioFrame {
        if self.wants_fadeout {
            return frame * self.fade_level;
        }
        if !self.had_signal {
            self.had_signal = (frame.left - self.last_frame.left).abs() > CHANGE_THRESHOLD
                || (frame.right - self.last_frame.right).abs() > CHANGE_THRESHOLD;
            self.last_frame = frame;
        }
        frame
    }

    /// Advance the state machine using the monotonic clock.
    pub fn maybe_sleep(&mut self) -> bool {
        self.maybe_sleep_at(monotonic_ms())
    }

    /// Advance the state machine at `now_ms`; true means the channel should sleep.
    pub fn maybe_sleep_at(&mut self, now_ms: u64) -> bool {
        let awake_for_ms = now_ms.saturating_sub(self.woken_at_ms);
        if awake_for_ms < u64::from(self.wait_ms) {
            return false;
        }
        if self.wants_fadeout {
            if self.fade_level > 0.0 {
                self.decrement_fade_level(awake_for_ms);
                return false;
            }
        } else if self.had_signal {
            self.reset_awake(now_ms);
            return false;
        }
        true
    }

    fn decrement_fade_level(&mut self, awake_for_ms: u64) {
        let elapsed_fade_ms = awake_for_ms.saturating_sub(u64::from(self.wait_ms)) as f32;
        let decrement = self.fade_decrement_per_ms * elapsed_fade_ms;
        self.fade_level = (1.0 - decrement).clamp(0.0, 1.0);
    }

    fn reset_awake(&mut self, now_ms: u64) {
        self.woken_at_ms = now_ms;
        self.fade_level = 1.0;
        self.had_signal = false;
    }

    /// Restart the awake period using the monotonic clock.
    pub fn wake_up(&mut self, is_enabled: bool) -> bool {
        self.wake_up_at(monotonic_ms(), is_enabled)
    }

    /// Restart the awake period at `now_ms`.
    ///
    /// Returns true when the channel was asleep and must be enabled.
    pub fn wake_up_at(&mut self, now_ms: u64, is_enabled: bool) -> bool {
        self.reset_awake(now_ms);
        !is_enabled
    }
}
