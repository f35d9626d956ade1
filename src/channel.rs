//! Mixer channels.
//!
//! A [`MixerChannel`] is one independently clocked audio source. Devices
//! push native samples into it; the engine pulls frames at the mixer rate
//! once per block through [`MixerChannel::mix`]. All mutable state sits
//! behind a re-entrant lock so a device may group several calls under
//! [`MixerChannel::lock`] while the engine keeps mixing from its own thread.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, info, warn};

use crate::convert::{SampleBlock, SampleLayout};
use crate::effects::noise_gate::{DEFAULT_ATTACK_MS, DEFAULT_RELEASE_MS, DEFAULT_THRESHOLD_DB};
use crate::effects::{NoiseGate, db_to_gain};
use crate::envelope::Envelope;
use crate::filter::{FilterKind, FilterState, MAX_FILTER_ORDER, StereoFilter};
use crate::frame::{
    AudioFrame, ChannelFeature, MAX_16BIT_SAMPLE_VALUE, REVERSE_MAP, STEREO_MAP, StereoLine,
};
use crate::resample::{RateAdapter, RatePath, ResampleMethod};
use crate::sleeper::{DEFAULT_WAIT_MS, Sleeper, monotonic_ms};
use crate::{ChannelStatus, MixerError, notify_warning};

/// Sample rate sentinel meaning "run at the mixer rate".
pub const USE_MIXER_RATE: u32 = 0;

/// Per-sample decrement used when ramping to silence.
const SILENCE_RAMP_STEP: f32 = 4.0;

const REVERB_LEVEL_MIN_DB: f32 = -40.0;
const CHORUS_LEVEL_MIN_DB: f32 = -24.0;
const DB_PER_FILTER_ORDER: u32 = 6;

/// Production callback bound to a channel; receives the frames wanted.
pub type ChannelHandler = Arc<dyn Fn(usize) + Send + Sync>;

/// Shared channel pointer.
pub type MixerChannelPtr = Arc<MixerChannel>;

/// Mixer rate and block size shared between the engine and its channels.
#[derive(Debug)]
pub struct MixerRates {
    sample_rate_hz: AtomicU32,
    blocksize: AtomicU32,
}

impl MixerRates {
    /// Rates for a mixer running at `sample_rate_hz` with `blocksize` frames per block.
    pub fn new(sample_rate_hz: u32, blocksize: u32) -> Self {
        Self {
            sample_rate_hz: AtomicU32::new(sample_rate_hz),
            blocksize: AtomicU32::new(blocksize),
        }
    }

    /// Mixer rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate_hz.load(Ordering::Relaxed)
    }

    /// Frames per block.
    pub fn blocksize(&self) -> u32 {
        self.blocksize.load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self, sample_rate_hz: u32, blocksize: u32) {
        self.sample_rate_hz.store(sample_rate_hz, Ordering::Relaxed);
        self.blocksize.store(blocksize, Ordering::Relaxed);
    }

    /// Mixer frames per millisecond.
    pub fn frames_per_tick(&self) -> f32 {
        self.sample_rate() as f32 / 1000.0
    }
}

/// Settings kept across a channel being torn down and re-created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelSettings {
    /// Enabled flag.
    pub is_enabled: bool,
    /// User gain pair.
    pub user_volume: AudioFrame,
    /// Lineout map.
    pub lineout_map: StereoLine,
    /// Crossfeed strength.
    pub crossfeed_strength: f32,
    /// Reverb send level.
    pub reverb_level: f32,
    /// Chorus send level.
    pub chorus_level: f32,
}

/// Which master effects are on, deciding which cached sends get restored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MasterEffects {
    /// Crossfeed enabled on the mixer.
    pub crossfeed: bool,
    /// Reverb enabled on the mixer.
    pub reverb: bool,
    /// Chorus enabled on the mixer.
    pub chorus: bool,
}

/// Filter configuration snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterSettings {
    /// On or off.
    pub state: FilterState,
    /// Butterworth order.
    pub order: u32,
    /// Cutoff in Hz after clamping.
    pub cutoff_hz: u32,
}

struct FilterSlot {
    settings: FilterSettings,
    filter: StereoFilter,
}

impl FilterSlot {
    fn new(kind: FilterKind) -> Self {
        Self {
            settings: FilterSettings {
                state: FilterState::Off,
                order: 0,
                cutoff_hz: 0,
            },
            filter: StereoFilter::new(kind),
        }
    }

    fn init(&mut self, mixer_rate_hz: u32) {
        if self.settings.order > 0 && self.settings.cutoff_hz > 0 {
            self.filter
                .setup(self.settings.order, mixer_rate_hz, f64::from(self.settings.cutoff_hz));
        }
    }
}

struct NoiseGateSlot {
    threshold_db: f32,
    attack_ms: f32,
    release_ms: f32,
    gate: NoiseGate,
}

#[derive(Clone, Copy, Debug, Default)]
struct Crossfeed {
    strength: f32,
    pan_left: f32,
    pan_right: f32,
}

impl Crossfeed {
    #[inline]
    fn apply(&self, frame: AudioFrame) -> AudioFrame {
        let pan = |sample: f32, pan: f32| AudioFrame::new((1.0 - pan) * sample, pan * sample);
        pan(frame.left, self.pan_left) + pan(frame.right, self.pan_right)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct EffectSend {
    level: f32,
    gain: f32,
}

/// Everything behind the channel lock.
pub(crate) struct ChannelState {
    name: String,
    features: BTreeSet<ChannelFeature>,
    rates: Arc<MixerRates>,

    sample_rate_hz: u32,
    frames_needed: usize,
    audio_frames: Vec<AudioFrame>,
    convert_buffer: Vec<AudioFrame>,
    prev_frame: AudioFrame,
    next_frame: AudioFrame,

    user_volume: AudioFrame,
    app_volume: AudioFrame,
    db0_volume: f32,
    combined_volume: AudioFrame,

    channel_map: StereoLine,
    output_map: StereoLine,

    last_samples_were_stereo: bool,
    last_samples_were_silence: bool,
    is_enabled: bool,

    peak_amplitude: f32,
    envelope: Envelope,
    adapter: RateAdapter,

    do_noise_gate: bool,
    noise_gate: NoiseGateSlot,
    highpass: FilterSlot,
    lowpass: FilterSlot,

    do_crossfeed: bool,
    crossfeed: Crossfeed,
    do_reverb_send: bool,
    reverb: EffectSend,
    do_chorus_send: bool,
    chorus: EffectSend,

    do_sleep: bool,
    sleeper: Sleeper,
    last_peak: f32,
}

impl ChannelState {
    fn new(name: &str, features: &BTreeSet<ChannelFeature>, rates: Arc<MixerRates>) -> Self {
        Self {
            name: name.to_string(),
            features: features.clone(),
            rates,
            sample_rate_hz: 0,
            frames_needed: 0,
            audio_frames: Vec::new(),
            convert_buffer: Vec::new(),
            prev_frame: AudioFrame::ZERO,
            next_frame: AudioFrame::ZERO,
            user_volume: AudioFrame::splat(1.0),
            app_volume: AudioFrame::splat(1.0),
            db0_volume: 1.0,
            combined_volume: AudioFrame::splat(1.0),
            channel_map: STEREO_MAP,
            output_map: STEREO_MAP,
            last_samples_were_stereo: false,
            last_samples_were_silence: true,
            is_enabled: false,
            peak_amplitude: MAX_16BIT_SAMPLE_VALUE,
            envelope: Envelope::new(1, MAX_16BIT_SAMPLE_VALUE),
            adapter: RateAdapter::new(),
            do_noise_gate: false,
            noise_gate: NoiseGateSlot {
                threshold_db: DEFAULT_THRESHOLD_DB,
                attack_ms: DEFAULT_ATTACK_MS,
                release_ms: DEFAULT_RELEASE_MS,
                gate: NoiseGate::default(),
            },
            highpass: FilterSlot::new(FilterKind::HighPass),
            lowpass: FilterSlot::new(FilterKind::LowPass),
            do_crossfeed: false,
            crossfeed: Crossfeed::default(),
            do_reverb_send: false,
            reverb: EffectSend::default(),
            do_chorus_send: false,
            chorus: EffectSend::default(),
            do_sleep: features.contains(&ChannelFeature::Sleep),
            sleeper: Sleeper::new(DEFAULT_WAIT_MS),
            last_peak: 0.0,
        }
    }

    fn has_feature(&self, feature: ChannelFeature) -> bool {
        self.features.contains(&feature)
    }

    fn mixer_rate(&self) -> u32 {
        self.rates.sample_rate()
    }

    fn stretch_factor(&self) -> f32 {
        self.sample_rate_hz as f32 / self.mixer_rate().max(1) as f32
    }

    fn update_combined_volume(&mut self) {
        self.combined_volume = self.user_volume * self.app_volume * self.db0_volume;
    }

    fn set_sample_rate(&mut self, rate_hz: u32) {
        let target_hz = if rate_hz == USE_MIXER_RATE {
            self.mixer_rate()
        } else {
            rate_hz
        };
        debug_assert!(target_hz > 0);
        if target_hz == self.sample_rate_hz {
            return;
        }
        debug!("{}: Changing rate from {} to {target_hz} Hz", self.name, self.sample_rate_hz);
        self.sample_rate_hz = target_hz;

        self.envelope.update(target_hz, self.peak_amplitude);
        if self.do_noise_gate {
            self.init_noise_gate();
        }
        let mixer_rate = self.mixer_rate();
        if self.highpass.settings.state == FilterState::On {
            self.highpass.init(mixer_rate);
        }
        if self.lowpass.settings.state == FilterState::On {
            self.lowpass.init(mixer_rate);
        }
        self.configure_resampler();
    }

    fn configure_resampler(&mut self) {
        let mixer_rate = self.mixer_rate();
        if let Err(err) = self.adapter.configure(&self.name, self.sample_rate_hz, mixer_rate) {
            warn!("{}: Failed to configure resampler: {err}", self.name);
        }
    }

    fn init_noise_gate(&mut self) {
        let gate = &mut self.noise_gate;
        gate.gate.configure(
            self.sample_rate_hz,
            MAX_16BIT_SAMPLE_VALUE,
            gate.threshold_db,
            gate.attack_ms,
            gate.release_ms,
        );
    }

    fn enable(&mut self, should_enable: bool) {
        if self.is_enabled == should_enable {
            return;
        }
        if !should_enable {
            self.frames_needed = 0;
            self.audio_frames.clear();
            self.prev_frame = AudioFrame::ZERO;
            self.next_frame = AudioFrame::ZERO;
            self.adapter.clear();
        }
        self.is_enabled = should_enable;
    }

    fn clamp_cutoff(&self, cutoff_hz: u32) -> u32 {
        let max_cutoff_hz = (self.mixer_rate() / 2).saturating_sub(1);
        if cutoff_hz <= max_cutoff_hz {
            cutoff_hz
        } else {
            debug!(
                "{}: Filter cutoff frequency {cutoff_hz} Hz is above half the sample rate, \
                 clamping to {max_cutoff_hz} Hz",
                self.name
            );
            max_cutoff_hz
        }
    }

    fn configure_filter(&mut self, kind: FilterKind, order: u32, cutoff_hz: u32) {
        debug_assert!((1..=MAX_FILTER_ORDER).contains(&order));
        debug_assert!(cutoff_hz > 0);
        let cutoff_hz = self.clamp_cutoff(cutoff_hz);
        let mixer_rate = self.mixer_rate();
        let slot = match kind {
            FilterKind::HighPass => &mut self.highpass,
            FilterKind::LowPass => &mut self.lowpass,
        };
        slot.settings.order = order.clamp(1, MAX_FILTER_ORDER);
        slot.settings.cutoff_hz = cutoff_hz;
        slot.init(mixer_rate);
    }

    fn set_filter_state(&mut self, kind: FilterKind, state: FilterState) {
        let (slot, label) = match kind {
            FilterKind::HighPass => (&mut self.highpass, "High-pass"),
            FilterKind::LowPass => (&mut self.lowpass, "Low-pass"),
        };
        slot.settings.state = state;
        if state == FilterState::On {
            debug_assert!(slot.settings.order > 0 && slot.settings.cutoff_hz > 0);
            info!(
                "{}: {label} filter enabled ({} dB/oct at {} Hz)",
                self.name,
                slot.settings.order * DB_PER_FILTER_ORDER,
                slot.settings.cutoff_hz
            );
        }
    }

    fn set_custom_filter(
        &mut self,
        type_pref: &str,
        order_pref: &str,
        cutoff_pref: &str,
    ) -> Result<(), MixerError> {
        let filter_name = if type_pref == "lpf" { "low-pass" } else { "high-pass" };

        let order = match order_pref.parse::<i64>() {
            Ok(order) if (1..=i64::from(MAX_FILTER_ORDER)).contains(&order) => order as u32,
            _ => {
                notify_warning(
                    &self.name,
                    format!(
                        "Invalid custom {filter_name} filter order '{order_pref}', \
                         must be between 1 and {MAX_FILTER_ORDER}"
                    ),
                );
                return Err(MixerError::InvalidFilterOrder {
                    filter: filter_name.to_string(),
                    value: order_pref.to_string(),
                });
            }
        };

        let cutoff_hz = match cutoff_pref.parse::<i64>() {
            Ok(cutoff) if cutoff > 0 => cutoff.min(i64::from(u32::MAX)) as u32,
            _ => {
                notify_warning(
                    &self.name,
                    format!(
                        "Invalid custom {filter_name} filter cutoff frequency '{cutoff_pref}', \
                         must be a positive number"
                    ),
                );
                return Err(MixerError::InvalidFilterCutoff {
                    filter: filter_name.to_string(),
                    value: cutoff_pref.to_string(),
                });
            }
        };

        let kind = match type_pref {
            "lpf" => FilterKind::LowPass,
            "hpf" => FilterKind::HighPass,
            _ => {
                notify_warning(
                    &self.name,
                    format!("Invalid custom filter type '{type_pref}', must be 'lpf' or 'hpf'"),
                );
                return Err(MixerError::InvalidFilterType(type_pref.to_string()));
            }
        };

        self.configure_filter(kind, order, cutoff_hz);
        self.set_filter_state(kind, FilterState::On);
        Ok(())
    }

    fn try_parse_and_set_custom_filter(&mut self, prefs: &str) -> Result<(), MixerError> {
        self.set_filter_state(FilterKind::LowPass, FilterState::Off);
        self.set_filter_state(FilterKind::HighPass, FilterState::Off);

        let result = self.parse_custom_filter(prefs);
        if result.is_err() {
            self.set_filter_state(FilterKind::LowPass, FilterState::Off);
            self.set_filter_state(FilterKind::HighPass, FilterState::Off);
        }
        result
    }

    fn parse_custom_filter(&mut self, prefs: &str) -> Result<(), MixerError> {
        let invalid = |name: &str| {
            notify_warning(
                name,
                format!(
                    "Invalid custom filter definition '{prefs}', must be 'lpf|hpf ORDER CUTOFF' \
                     or two such definitions"
                ),
            );
            MixerError::InvalidFilter(prefs.to_string())
        };

        if !(prefs.starts_with("lpf") || prefs.starts_with("hpf")) {
            return Err(invalid(&self.name));
        }

        let parts: Vec<&str> = prefs.split_whitespace().collect();
        match parts.as_slice() {
            [kind, order, cutoff] => self.set_custom_filter(kind, order, cutoff),
            [kind1, order1, cutoff1, kind2, order2, cutoff2] => {
                if kind1 == kind2 {
                    notify_warning(
                        &self.name,
                        format!("Invalid custom filter definition '{prefs}', duplicate filter types"),
                    );
                    return Err(MixerError::DuplicateFilter(prefs.to_string()));
                }
                self.set_custom_filter(kind1, order1, cutoff1)?;
                self.set_custom_filter(kind2, order2, cutoff2)
            }
            _ => Err(invalid(&self.name)),
        }
    }

    fn set_crossfeed_strength(&mut self, strength: f32) {
        debug_assert!((0.0..=1.0).contains(&strength));
        let strength = strength.clamp(0.0, 1.0);

        self.do_crossfeed = self.has_feature(ChannelFeature::Stereo) && strength > 0.0;
        if !self.do_crossfeed {
            self.crossfeed.strength = 0.0;
            debug!("{}: Crossfeed is off", self.name);
            return;
        }

        let p = (1.0 - strength) / 2.0;
        const CENTER: f32 = 0.5;
        self.crossfeed = Crossfeed {
            strength,
            pan_left: CENTER - p,
            pan_right: CENTER + p,
        };
        debug!("{}: Crossfeed strength: {strength:.3}", self.name);
    }

    fn set_send_level(&mut self, which: SendKind, level: f32) {
        debug_assert!((0.0..=1.0).contains(&level));
        let level = level.clamp(0.0, 1.0);
        let (feature, min_db, label) = match which {
            SendKind::Reverb => (ChannelFeature::ReverbSend, REVERB_LEVEL_MIN_DB, "Reverb"),
            SendKind::Chorus => (ChannelFeature::ChorusSend, CHORUS_LEVEL_MIN_DB, "Chorus"),
        };
        let enabled = self.has_feature(feature) && level > 0.0;
        let send = if enabled {
            let level_db = min_db + level * (0.0 - min_db);
            let gain = db_to_gain(level_db);
            debug!(
                "{}: {label} send is on: level: {level:4.2}, level_db: {level_db:6.2}, gain: {gain:4.2}",
                self.name
            );
            EffectSend { level, gain }
        } else {
            debug!("{}: {label} send is off", self.name);
            EffectSend {
                level: 0.0,
                gain: db_to_gain(min_db),
            }
        };
        match which {
            SendKind::Reverb => {
                self.do_reverb_send = enabled;
                self.reverb = send;
            }
            SendKind::Chorus => {
                self.do_chorus_send = enabled;
                self.chorus = send;
            }
        }
    }

    fn add_samples(&mut self, block: SampleBlock<'_>, layout: SampleLayout) {
        let num_frames = block.frames(layout);
        if num_frames == 0 {
            return;
        }
        self.last_samples_were_stereo = layout.stereo;
        self.last_samples_were_silence = false;

        let path = self.adapter.rate_path();
        debug_assert!(!(path.lerp_upsample && path.resample));

        self.convert_samples(block, layout, num_frames);

        let start = self.audio_frames.len();
        let converted = std::mem::take(&mut self.convert_buffer);
        self.adapter.process(&self.name, &converted, &mut self.audio_frames);
        self.convert_buffer = converted;

        self.apply_effects(start);
    }

    /// Decode, map, apply gain and envelope; zero-order hold repeats frames here.
    fn convert_samples(&mut self, block: SampleBlock<'_>, layout: SampleLayout, num_frames: usize) {
        self.convert_buffer.clear();
        let channel_map = self.channel_map;
        let output_map = self.output_map;

        let mut pos = 0;
        while pos < num_frames {
            self.prev_frame = self.next_frame;
            block.decode_into(pos, layout, &mut self.next_frame);

            let mut frame = if layout.stereo {
                AudioFrame::new(
                    self.prev_frame[channel_map.left],
                    self.prev_frame[channel_map.right],
                )
            } else {
                AudioFrame::splat(self.prev_frame[channel_map.left])
            };
            frame *= self.combined_volume;
            self.envelope.process(&mut frame);

            let mut out = AudioFrame::ZERO;
            out[output_map.left] += frame.left;
            out[output_map.right] += frame.right;
            self.convert_buffer.push(out);

            if self.adapter.zoh_advance() {
                pos += 1;
            }
        }
    }

    fn apply_effects(&mut self, start: usize) {
        let highpass_on = self.highpass.settings.state == FilterState::On;
        let lowpass_on = self.lowpass.settings.state == FilterState::On;

        for frame in &mut self.audio_frames[start..] {
            if self.do_noise_gate {
                *frame = self.noise_gate.gate.process(*frame);
            }
            if highpass_on {
                *frame = self.highpass.filter.process(*frame);
            }
            if lowpass_on {
                *frame = self.lowpass.filter.process(*frame);
            }
            if self.do_crossfeed {
                *frame = self.crossfeed.apply(*frame);
            }
        }
    }

    fn add_silence(&mut self) {
        if self.audio_frames.len() < self.frames_needed {
            if self.prev_frame.is_silent() {
                self.audio_frames.resize(self.frames_needed, AudioFrame::ZERO);
                self.next_frame = AudioFrame::ZERO;
            } else {
                let stereo = self.last_samples_were_stereo;
                let output_map = self.output_map;
                let step = SILENCE_RAMP_STEP;
                let toward_zero = |sample: f32| {
                    if sample > step {
                        sample - step
                    } else if sample < -step {
                        sample + step
                    } else {
                        0.0
                    }
                };

                while self.audio_frames.len() < self.frames_needed {
                    self.next_frame = AudioFrame::new(
                        toward_zero(self.prev_frame.left),
                        toward_zero(self.prev_frame.right),
                    );
                    let source = if stereo {
                        self.prev_frame
                    } else {
                        AudioFrame::splat(self.prev_frame.left)
                    };
                    let with_gain = source * self.combined_volume;

                    let mut out = AudioFrame::ZERO;
                    out[output_map.left] = with_gain.left;
                    out[output_map.right] = with_gain.right;
                    self.audio_frames.push(out);

                    self.prev_frame = self.next_frame;
                }
            }
        }
        self.last_samples_were_silence = true;
    }

    fn wake_up_at(&mut self, now_ms: u64) -> bool {
        let was_sleeping = self.sleeper.wake_up_at(now_ms, self.is_enabled);
        if was_sleeping {
            self.enable(true);
        }
        was_sleeping
    }

    fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            is_enabled: self.is_enabled,
            user_volume: self.user_volume,
            lineout_map: self.output_map,
            crossfeed_strength: self.crossfeed.strength,
            reverb_level: self.reverb.level,
            chorus_level: self.chorus.level,
        }
    }

    fn set_settings(&mut self, settings: &ChannelSettings, master: MasterEffects) {
        self.is_enabled = settings.is_enabled;
        self.user_volume = settings.user_volume;
        self.update_combined_volume();
        self.output_map = settings.lineout_map;
        if master.crossfeed {
            self.set_crossfeed_strength(settings.crossfeed_strength);
        }
        if master.reverb {
            self.set_send_level(SendKind::Reverb, settings.reverb_level);
        }
        if master.chorus {
            self.set_send_level(SendKind::Chorus, settings.chorus_level);
        }
    }

    fn describe_lineout(&self) -> &'static str {
        if !self.has_feature(ChannelFeature::Stereo) {
            "mono"
        } else if self.output_map == STEREO_MAP {
            "stereo"
        } else if self.output_map == REVERSE_MAP {
            "reverse"
        } else {
            "unknown"
        }
    }
}

#[derive(Clone, Copy)]
enum SendKind {
    Reverb,
    Chorus,
}

/// Auxiliary buffers a channel may send into during accumulation.
pub(crate) struct AuxSends<'a> {
    pub(crate) reverb: Option<&'a mut [AudioFrame]>,
    pub(crate) chorus: Option<&'a mut [AudioFrame]>,
}

/// Guard returned by [`MixerChannel::lock`].
pub struct ChannelLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<ChannelState>>,
}

/// One named audio source feeding the mixer.
pub struct MixerChannel {
    name: String,
    features: BTreeSet<ChannelFeature>,
    handler: ChannelHandler,
    rates: Arc<MixerRates>,
    state: ReentrantMutex<RefCell<ChannelState>>,
}

impl std::fmt::Debug for MixerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerChannel")
            .field("name", &self.name)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl MixerChannel {
    /// Create a disabled channel with no rate set.
    ///
    /// Channels are normally created through the registry, which also
    /// applies the rate and the default sends.
    pub fn new(
        handler: ChannelHandler,
        name: &str,
        features: impl IntoIterator<Item = ChannelFeature>,
        rates: Arc<MixerRates>,
    ) -> Self {
        let features: BTreeSet<ChannelFeature> = features.into_iter().collect();
        let state = ChannelState::new(name, &features, Arc::clone(&rates));
        Self {
            name: name.to_string(),
            features,
            handler,
            rates,
            state: ReentrantMutex::new(RefCell::new(state)),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ChannelState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    fn read_state<R>(&self, f: impl FnOnce(&ChannelState) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    /// Hold the channel lock so several calls apply atomically.
    pub fn lock(&self) -> ChannelLock<'_> {
        ChannelLock {
            _guard: self.state.lock(),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared capabilities.
    pub fn features(&self) -> &BTreeSet<ChannelFeature> {
        &self.features
    }

    /// Whether the channel declared `feature`.
    pub fn has_feature(&self, feature: ChannelFeature) -> bool {
        self.features.contains(&feature)
    }

    /// Native rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.read_state(|s| s.sample_rate_hz)
    }

    /// Set the native rate; [`USE_MIXER_RATE`] selects the mixer rate.
    pub fn set_sample_rate(&self, rate_hz: u32) {
        self.with_state(|s| s.set_sample_rate(rate_hz));
    }

    /// Channel frames per millisecond tick.
    pub fn frames_per_tick(&self) -> f32 {
        self.read_state(|s| self.rates.frames_per_tick() * s.stretch_factor())
    }

    /// Channel frames per mixer block.
    pub fn frames_per_block(&self) -> f32 {
        self.read_state(|s| self.rates.blocksize() as f32 * s.stretch_factor())
    }

    /// Duration of one channel frame in milliseconds.
    pub fn millis_per_frame(&self) -> f64 {
        self.read_state(|s| 1000.0 / f64::from(s.sample_rate_hz.max(1)))
    }

    /// Set the device's natural peak and re-arm the start-up envelope.
    pub fn set_peak_amplitude(&self, peak: u32) {
        self.with_state(|s| {
            s.peak_amplitude = peak as f32;
            s.envelope.update(s.sample_rate_hz, s.peak_amplitude);
        });
    }

    /// User gain pair.
    pub fn user_volume(&self) -> AudioFrame {
        self.read_state(|s| s.user_volume)
    }

    /// Set the user gain; any value is accepted.
    pub fn set_user_volume(&self, gain: AudioFrame) {
        self.with_state(|s| {
            s.user_volume = gain;
            s.update_combined_volume();
        });
    }

    /// Application gain pair.
    pub fn app_volume(&self) -> AudioFrame {
        self.read_state(|s| s.app_volume)
    }

    /// Set the application gain, clamped per side to `0.0..=1.0`.
    pub fn set_app_volume(&self, gain: AudioFrame) {
        self.with_state(|s| {
            s.app_volume = AudioFrame::new(gain.left.clamp(0.0, 1.0), gain.right.clamp(0.0, 1.0));
            s.update_combined_volume();
        });
    }

    /// Device calibration scalar.
    pub fn db0_volume(&self) -> f32 {
        self.read_state(|s| s.db0_volume)
    }

    /// Set the scalar mapping the device's full scale to the canonical domain.
    pub fn set_0db_scalar(&self, scalar: f32) {
        debug_assert!((0.0..=MAX_16BIT_SAMPLE_VALUE).contains(&scalar));
        self.with_state(|s| {
            s.db0_volume = scalar.clamp(0.0, MAX_16BIT_SAMPLE_VALUE);
            s.update_combined_volume();
        });
    }

    /// Product of the user, app and calibration gains.
    pub fn combined_volume(&self) -> AudioFrame {
        self.read_state(|s| s.combined_volume)
    }

    /// How the source's own left/right are read.
    pub fn channel_map(&self) -> StereoLine {
        self.read_state(|s| s.channel_map)
    }

    /// Set the channel map.
    pub fn set_channel_map(&self, map: StereoLine) {
        self.with_state(|s| s.channel_map = map);
    }

    /// How the processed signal lands on the output lines.
    pub fn lineout_map(&self) -> StereoLine {
        self.read_state(|s| s.output_map)
    }

    /// Set the lineout map.
    pub fn set_lineout_map(&self, map: StereoLine) {
        self.with_state(|s| s.output_map = map);
    }

    /// `mono`, `stereo` or `reverse`.
    pub fn describe_lineout(&self) -> &'static str {
        self.read_state(|s| s.describe_lineout())
    }

    /// Whether the channel is producing audio.
    pub fn is_enabled(&self) -> bool {
        self.read_state(|s| s.is_enabled)
    }

    /// Enable or disable the channel; disabling drops pending audio and resets conversion state.
    pub fn enable(&self, should_enable: bool) {
        self.with_state(|s| s.enable(should_enable));
    }

    /// Selected resampling strategy.
    pub fn resample_method(&self) -> ResampleMethod {
        self.read_state(|s| s.adapter.method())
    }

    /// Select a resampling strategy and reconfigure.
    pub fn set_resample_method(&self, method: ResampleMethod) {
        self.with_state(|s| {
            s.adapter.set_method(method);
            s.configure_resampler();
        });
    }

    /// Set the zero-order-hold target rate and reconfigure.
    pub fn set_zero_order_hold_upsampler_target_rate(&self, rate_hz: u32) {
        debug_assert!(rate_hz > 0);
        self.with_state(|s| {
            s.adapter.set_zoh_target_rate(rate_hz);
            debug!("{}: Set zero-order-hold upsampler target rate to {rate_hz} Hz", s.name);
            s.configure_resampler();
        });
    }

    /// Active conversion stages.
    pub fn rate_path(&self) -> RatePath {
        self.read_state(|s| s.adapter.rate_path())
    }

    /// Configure the high-pass filter; the cutoff is clamped below Nyquist.
    pub fn configure_high_pass_filter(&self, order: u32, cutoff_hz: u32) {
        self.with_state(|s| s.configure_filter(FilterKind::HighPass, order, cutoff_hz));
    }

    /// Configure the low-pass filter; the cutoff is clamped below Nyquist.
    pub fn configure_low_pass_filter(&self, order: u32, cutoff_hz: u32) {
        self.with_state(|s| s.configure_filter(FilterKind::LowPass, order, cutoff_hz));
    }

    /// Turn the high-pass filter on or off.
    pub fn set_high_pass_filter(&self, state: FilterState) {
        self.with_state(|s| s.set_filter_state(FilterKind::HighPass, state));
    }

    /// Turn the low-pass filter on or off.
    pub fn set_low_pass_filter(&self, state: FilterState) {
        self.with_state(|s| s.set_filter_state(FilterKind::LowPass, state));
    }

    /// High-pass filter state.
    pub fn high_pass_filter_state(&self) -> FilterState {
        self.read_state(|s| s.highpass.settings.state)
    }

    /// Low-pass filter state.
    pub fn low_pass_filter_state(&self) -> FilterState {
        self.read_state(|s| s.lowpass.settings.state)
    }

    /// High-pass filter configuration.
    pub fn high_pass_filter(&self) -> FilterSettings {
        self.read_state(|s| s.highpass.settings)
    }

    /// Low-pass filter configuration.
    pub fn low_pass_filter(&self) -> FilterSettings {
        self.read_state(|s| s.lowpass.settings)
    }

    /// Apply `"lpf|hpf ORDER CUTOFF"`, optionally twice with different types.
    ///
    /// Both filters are switched off first and stay off if parsing fails.
    pub fn try_parse_and_set_custom_filter(&self, prefs: &str) -> Result<(), MixerError> {
        self.with_state(|s| s.try_parse_and_set_custom_filter(prefs))
    }

    /// Configure the noise gate.
    pub fn configure_noise_gate(&self, threshold_db: f32, attack_ms: f32, release_ms: f32) {
        debug_assert!(attack_ms > 0.0 && release_ms > 0.0);
        self.with_state(|s| {
            s.noise_gate.threshold_db = threshold_db;
            s.noise_gate.attack_ms = attack_ms;
            s.noise_gate.release_ms = release_ms;
            s.init_noise_gate();
        });
    }

    /// Turn the noise gate on or off.
    pub fn enable_noise_gate(&self, enabled: bool) {
        self.with_state(|s| {
            info!("{}: Noise gate {}", s.name, if enabled { "enabled" } else { "disabled" });
            s.do_noise_gate = enabled;
            if enabled {
                s.init_noise_gate();
            }
        });
    }

    /// Whether the noise gate is on.
    pub fn noise_gate_enabled(&self) -> bool {
        self.read_state(|s| s.do_noise_gate)
    }

    /// Crossfeed strength (0 when off).
    pub fn crossfeed_strength(&self) -> f32 {
        self.read_state(|s| s.crossfeed.strength)
    }

    /// Set crossfeed strength; only stereo channels with a positive strength engage it.
    pub fn set_crossfeed_strength(&self, strength: f32) {
        self.with_state(|s| s.set_crossfeed_strength(strength));
    }

    /// Crossfeed pan coefficients (left, right).
    pub fn crossfeed_pans(&self) -> (f32, f32) {
        self.read_state(|s| (s.crossfeed.pan_left, s.crossfeed.pan_right))
    }

    /// Whether crossfeed processing is engaged.
    pub fn crossfeed_enabled(&self) -> bool {
        self.read_state(|s| s.do_crossfeed)
    }

    /// Reverb send level (0 when off).
    pub fn reverb_level(&self) -> f32 {
        self.read_state(|s| s.reverb.level)
    }

    /// Set the reverb send level in `0.0..=1.0`.
    pub fn set_reverb_level(&self, level: f32) {
        self.with_state(|s| s.set_send_level(SendKind::Reverb, level));
    }

    /// Chorus send level (0 when off).
    pub fn chorus_level(&self) -> f32 {
        self.read_state(|s| s.chorus.level)
    }

    /// Set the chorus send level in `0.0..=1.0`.
    pub fn set_chorus_level(&self, level: f32) {
        self.with_state(|s| s.set_send_level(SendKind::Chorus, level));
    }

    /// Configure fade-out before sleeping.
    pub fn configure_fade_out(&self, prefs: &str) -> Result<(), MixerError> {
        self.with_state(|s| {
            let name = s.name.clone();
            s.sleeper.configure_fade_out(&name, prefs)
        })
    }

    /// Restart the awake period, enabling the channel if it slept.
    pub fn wake_up(&self) -> bool {
        self.wake_up_at(monotonic_ms())
    }

    /// Like [`wake_up`](Self::wake_up) at an explicit clock reading.
    pub fn wake_up_at(&self, now_ms: u64) -> bool {
        self.with_state(|s| {
            debug_assert!(s.do_sleep, "{}: wake_up needs the Sleep feature", s.name);
            s.wake_up_at(now_ms)
        })
    }

    /// Pending frames not yet consumed by the mixer.
    pub fn frames_pending(&self) -> usize {
        self.read_state(|s| s.audio_frames.len())
    }

    /// Frames the mixer asked for in the current block.
    pub fn frames_needed(&self) -> usize {
        self.read_state(|s| s.frames_needed)
    }

    /// Copy of the pending frames.
    pub fn pending_frames(&self) -> Vec<AudioFrame> {
        self.read_state(|s| s.audio_frames.clone())
    }

    /// Last frame read from the device and the one after it.
    pub fn prev_next_frames(&self) -> (AudioFrame, AudioFrame) {
        self.read_state(|s| (s.prev_frame, s.next_frame))
    }

    /// Settings to cache across re-creation.
    pub fn get_settings(&self) -> ChannelSettings {
        self.read_state(|s| s.settings())
    }

    /// Restore cached settings; sends are restored only for master effects that are on.
    pub fn set_settings(&self, settings: &ChannelSettings, master: MasterEffects) {
        self.with_state(|s| s.set_settings(settings, master));
    }

    /// Ask the device for enough frames to fill `frames_requested`.
    ///
    /// The handler runs without the channel lock held.
    pub fn mix(&self, frames_requested: usize) {
        debug_assert!(frames_requested > 0);
        let enabled = self.with_state(|s| {
            if s.is_enabled {
                s.frames_needed = frames_requested;
            }
            s.is_enabled
        });
        if !enabled {
            return;
        }

        let mut last_len = None;
        loop {
            let frames_remaining = self.read_state(|s| {
                let len = s.audio_frames.len();
                if len >= s.frames_needed || last_len == Some(len) {
                    return 0;
                }
                last_len = Some(len);
                ((s.frames_needed - len) as f32 * s.stretch_factor()).ceil() as usize
            });
            if frames_remaining == 0 {
                break;
            }
            (self.handler)(frames_remaining);
        }
    }

    /// Pad pending frames up to the requested count, ramping down from the last frame.
    pub fn add_silence(&self) {
        self.with_state(|s| s.add_silence());
    }

    /// Ingest a block of native samples.
    pub fn add_samples(&self, block: SampleBlock<'_>, layout: SampleLayout) {
        self.with_state(|s| s.add_samples(block, layout));
    }

    /// Mono unsigned 8-bit.
    pub fn add_samples_m8(&self, data: &[u8]) {
        self.add_samples(SampleBlock::U8(data), SampleLayout::MONO);
    }

    /// Stereo unsigned 8-bit.
    pub fn add_samples_s8(&self, data: &[u8]) {
        self.add_samples(SampleBlock::U8(data), SampleLayout::STEREO);
    }

    /// Mono signed 8-bit.
    pub fn add_samples_m8s(&self, data: &[i8]) {
        self.add_samples(SampleBlock::S8(data), SampleLayout::MONO);
    }

    /// Mono signed 16-bit, host order.
    pub fn add_samples_m16(&self, data: &[i16]) {
        self.add_samples(SampleBlock::S16(data), SampleLayout::MONO);
    }

    /// Stereo signed 16-bit, host order.
    pub fn add_samples_s16(&self, data: &[i16]) {
        self.add_samples(SampleBlock::S16(data), SampleLayout::STEREO);
    }

    /// Mono signed 16-bit, swapped order.
    pub fn add_samples_m16_nonnative(&self, data: &[i16]) {
        self.add_samples(SampleBlock::S16(data), SampleLayout::MONO_SWAPPED);
    }

    /// Stereo signed 16-bit, swapped order.
    pub fn add_samples_s16_nonnative(&self, data: &[i16]) {
        self.add_samples(SampleBlock::S16(data), SampleLayout::STEREO_SWAPPED);
    }

    /// Mono floats in the canonical domain.
    pub fn add_samples_mfloat(&self, data: &[f32]) {
        self.add_samples(SampleBlock::F32(data), SampleLayout::MONO);
    }

    /// Stereo floats in the canonical domain.
    pub fn add_samples_sfloat(&self, data: &[f32]) {
        self.add_samples(SampleBlock::F32(data), SampleLayout::STEREO);
    }

    /// Already-converted stereo frames.
    pub fn add_audio_frames(&self, frames: &[AudioFrame]) {
        if frames.is_empty() {
            return;
        }
        let interleaved: Vec<f32> = frames.iter().flat_map(|f| [f.left, f.right]).collect();
        self.add_samples_sfloat(&interleaved);
    }

    /// Status snapshot for control surfaces.
    pub fn status(&self) -> ChannelStatus {
        self.read_state(|s| ChannelStatus {
            name: s.name.clone(),
            sample_rate_hz: s.sample_rate_hz,
            is_enabled: s.is_enabled,
            user_volume: s.user_volume,
            lineout: s.describe_lineout().to_string(),
            crossfeed_strength: s.crossfeed.strength,
            reverb_level: s.reverb.level,
            chorus_level: s.chorus.level,
            rate_path: s.adapter.rate_path().describe().to_string(),
            peak: s.last_peak,
        })
    }

    /// Sum pending frames into the master and aux buffers, drop them, and run the sleeper.
    pub(crate) fn accumulate(
        &self,
        output: &mut [AudioFrame],
        mut sends: AuxSends<'_>,
        now_ms: u64,
    ) {
        self.with_state(|s| {
            let num_frames = output.len().min(s.audio_frames.len());
            let mut peak = 0.0f32;

            for i in 0..num_frames {
                let frame = s.audio_frames[i];
                output[i] += if s.do_sleep {
                    s.sleeper.maybe_fade_or_listen(frame)
                } else {
                    frame
                };
                peak = peak.max(frame.peak());

                if s.do_reverb_send {
                    if let Some(reverb) = sends.reverb.as_deref_mut() {
                        reverb[i] += frame * s.reverb.gain;
                    }
                }
                if s.do_chorus_send {
                    if let Some(chorus) = sends.chorus.as_deref_mut() {
                        chorus[i] += frame * s.chorus.gain;
                    }
                }
            }
            s.audio_frames.drain(..num_frames);
            s.last_peak = peak;

            if s.do_sleep && s.sleeper.maybe_sleep_at(now_ms) && s.is_enabled {
                s.enable(false);
            }
        });
    }
}

