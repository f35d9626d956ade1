//! The mix engine.
//!
//! [`MixerContext`] owns the negotiated output format, the channel registry,
//! the master bus and the two output queues. Once per block the engine asks
//! every channel for frames, sums them into the master buffer together with
//! the reverb and chorus sends, runs the master effects and hands the block
//! to the host queue and, when recording, to the capture queue.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{info, warn};

use crate::channel::{AuxSends, ChannelSettings, MixerChannelPtr, MixerRates};
use crate::config::{
    ChorusPreset, CrossfeedPreset, MAX_PREBUFFER_MS, MixerConfig, ReverbPreset, parse_bool_setting,
};
use crate::effects::{Chorus, Compressor, Reverb};
use crate::filter::{FilterKind, StereoFilter};
use crate::frame::{AudioFrame, MAX_16BIT_SAMPLE_VALUE};
use crate::host::{AudioHost, DeviceRequest, OutputReader};
use crate::lock::PauseHooks;
use crate::queue::RwQueue;
use crate::sleeper::monotonic_ms;
use crate::{MixerError, init_tracing, notify_warning};

/// Name given to the engine thread.
pub const MIXER_THREAD_NAME: &str = "dosmix:mixer";

/// Default master gain per side (about -6 dB).
pub const DEFAULT_MASTER_GAIN: f32 = 0.501;

const MASTER_HIGHPASS_ORDER: u32 = 2;
const MASTER_HIGHPASS_CUTOFF_HZ: f64 = 20.0;
const REVERB_HIGHPASS_ORDER: u32 = 2;

const COMPRESSOR_THRESHOLD_DB: f32 = -6.0;
const COMPRESSOR_RATIO: f32 = 3.0;
const COMPRESSOR_ATTACK_MS: f32 = 0.01;
const COMPRESSOR_RELEASE_MS: f32 = 5000.0;
const COMPRESSOR_RMS_WINDOW_MS: f32 = 10.0;

/// Divisor taking the canonical domain down to the host range.
const NORMALIZE_DIVISOR: f32 = 32768.0;

/// Overall output state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixerState {
    /// Not yet initialised.
    Uninitialized,
    /// Running without a host device.
    NoSound,
    /// Producing audio.
    On,
    /// Producing silence.
    Muted,
}

impl MixerState {
    /// Human-readable label.
    pub fn as_str(&self) -> &'static str {
        match self {
            MixerState::Uninitialized => "Uninitialized",
            MixerState::NoSound => "No sound",
            MixerState::On => "On",
            MixerState::Muted => "Mute",
        }
    }
}

pub(crate) struct CrossfeedSettings {
    pub(crate) preset: CrossfeedPreset,
    pub(crate) global_strength: f32,
}

pub(crate) struct ReverbSettings {
    pub(crate) reverb: Reverb,
    pub(crate) highpass: StereoFilter,
    pub(crate) preset: ReverbPreset,
    pub(crate) synthesizer_send_level: f32,
    pub(crate) digital_audio_send_level: f32,
    pub(crate) highpass_cutoff_hz: f32,
}

pub(crate) struct ChorusSettings {
    pub(crate) chorus: Chorus,
    pub(crate) preset: ChorusPreset,
    pub(crate) synthesizer_send_level: f32,
    pub(crate) digital_audio_send_level: f32,
}

/// Engine state guarded by the mixer lock.
pub(crate) struct MixerCore {
    pub(crate) config: MixerConfig,
    pub(crate) channels: BTreeMap<String, MixerChannelPtr>,
    pub(crate) settings_cache: HashMap<String, ChannelSettings>,
    pub(crate) state: MixerState,
    pub(crate) is_manually_muted: bool,
    pub(crate) prebuffer_ms: u32,
    pub(crate) master_gain: AudioFrame,
    pub(crate) highpass: StereoFilter,
    pub(crate) do_compressor: bool,
    pub(crate) compressor: Compressor,
    pub(crate) do_crossfeed: bool,
    pub(crate) crossfeed: CrossfeedSettings,
    pub(crate) do_reverb: bool,
    pub(crate) reverb: ReverbSettings,
    pub(crate) do_chorus: bool,
    pub(crate) chorus: ChorusSettings,
    pub(crate) do_denoiser: bool,

    output_buffer: Vec<AudioFrame>,
    reverb_aux_buffer: Vec<AudioFrame>,
    chorus_aux_buffer: Vec<AudioFrame>,
    capture_buffer: Vec<i16>,
    capture_frame_counter: f32,
    last_mix_ms: u64,
    last_peak: f32,
}

impl MixerCore {
    fn prepare_buffers(&mut self, frames_requested: usize) {
        for buffer in [
            &mut self.output_buffer,
            &mut self.reverb_aux_buffer,
            &mut self.chorus_aux_buffer,
        ] {
            buffer.clear();
            buffer.resize(frames_requested, AudioFrame::ZERO);
        }
    }

    fn accumulate(&mut self, channel: &MixerChannelPtr, now_ms: u64) {
        let sends = AuxSends {
            reverb: self.do_reverb.then_some(&mut self.reverb_aux_buffer[..]),
            chorus: self.do_chorus.then_some(&mut self.chorus_aux_buffer[..]),
        };
        channel.accumulate(&mut self.output_buffer, sends, now_ms);
    }

    fn process_master_bus(&mut self, capture: Option<&RwQueue<i16>>) {
        if self.do_reverb {
            let reverb = &mut self.reverb;
            for (out, aux) in self.output_buffer.iter_mut().zip(&self.reverb_aux_buffer) {
                let filtered = reverb.highpass.process(*aux);
                *out += reverb.reverb.process(filtered);
            }
        }
        if self.do_chorus {
            let chorus = &mut self.chorus.chorus;
            for (out, aux) in self.output_buffer.iter_mut().zip(&self.chorus_aux_buffer) {
                *out += chorus.process(*aux);
            }
        }

        let gain = self.master_gain;
        let mut peak = 0.0f32;
        for frame in &mut self.output_buffer {
            *frame = self.highpass.process(*frame);
            *frame *= gain;
            if self.do_compressor {
                *frame = self.compressor.process(*frame);
            }
            peak = peak.max(frame.peak());
        }
        self.last_peak = peak / NORMALIZE_DIVISOR;

        if let Some(queue) = capture {
            self.capture_buffer.clear();
            for frame in &self.output_buffer {
                for sample in [frame.left, frame.right] {
                    self.capture_buffer.push(capture_sample(sample).to_le());
                }
            }
            // Skip rather than build up latency when the consumer lags.
            if queue.size() + self.capture_buffer.len() > queue.max_capacity() {
                queue.clear();
            }
            queue.nonblocking_bulk_enqueue(&self.capture_buffer);
        }

        for frame in &mut self.output_buffer {
            *frame *= 1.0 / NORMALIZE_DIVISOR;
        }
    }
}

/// State shared between the context and its engine thread.
pub(crate) struct MixerShared {
    pub(crate) rates: Arc<MixerRates>,
    pub(crate) pause_hooks: PauseHooks,
    pub(crate) core: ReentrantMutex<RefCell<MixerCore>>,
    pub(crate) final_output: Arc<RwQueue<AudioFrame>>,
    capture_queue: RwQueue<i16>,
    capturing: AtomicBool,
    fast_forward: AtomicBool,
    quit: AtomicBool,
}

impl MixerShared {
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut MixerCore) -> R) -> R {
        let guard = self.core.lock();
        let mut core = guard.borrow_mut();
        f(&mut core)
    }

    fn frames_to_request(&self, blocksize: usize) -> usize {
        let now_ms = monotonic_ms();
        self.with_core(|core| {
            let elapsed_ms = now_ms.saturating_sub(core.last_mix_ms);
            core.last_mix_ms = now_ms;
            if !self.fast_forward.load(Ordering::Relaxed) {
                return blocksize;
            }
            let catch_up =
                (elapsed_ms as f64 * f64::from(self.rates.sample_rate()) / 1000.0).floor();
            blocksize.max(catch_up as usize)
        })
    }

    /// Mix `frames_requested` frames into the master buffer.
    ///
    /// Channel handlers run without the core borrowed so they may call back
    /// into the context.
    fn mix_samples(&self, frames_requested: usize) {
        let guard = self.core.lock();
        let channels: Vec<MixerChannelPtr> = {
            let mut core = guard.borrow_mut();
            core.prepare_buffers(frames_requested);
            core.channels.values().cloned().collect()
        };

        let now_ms = monotonic_ms();
        for channel in &channels {
            channel.mix(frames_requested);
            guard.borrow_mut().accumulate(channel, now_ms);
        }

        let capture = self.capturing.load(Ordering::Relaxed).then_some(&self.capture_queue);
        guard.borrow_mut().process_master_bus(capture);
    }

    /// Run one loop iteration, leaving the host-bound block in `block`.
    fn run_block(&self, block: &mut Vec<AudioFrame>) -> MixerState {
        let blocksize = self.rates.blocksize() as usize;
        let guard = self.core.lock();

        let frames_requested = self.frames_to_request(blocksize);
        self.mix_samples(frames_requested);

        let core = guard.borrow();
        block.clear();
        match core.state {
            MixerState::On => squash_block(&core.output_buffer, blocksize, block),
            MixerState::Muted => block.resize(blocksize, AudioFrame::ZERO),
            MixerState::NoSound | MixerState::Uninitialized => {}
        }
        core.state
    }

    fn block_duration(&self) -> Duration {
        let rate = self.rates.sample_rate().max(1);
        Duration::from_secs_f64(f64::from(self.rates.blocksize()) / f64::from(rate))
    }
}

/// Saturate to the 16-bit range, truncating toward zero.
fn capture_sample(sample: f32) -> i16 {
    sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Compress `input` to `blocksize` frames by nearest-index picking.
pub(crate) fn squash_block(input: &[AudioFrame], blocksize: usize, out: &mut Vec<AudioFrame>) {
    if input.len() <= blocksize {
        out.extend_from_slice(input);
        return;
    }
    let index_add = input.len() as f64 / blocksize as f64;
    let mut index = 0.0f64;
    for _ in 0..blocksize {
        let src = (index.round() as usize).min(input.len() - 1);
        out.push(input[src]);
        index += index_add;
    }
}

fn mixer_thread_loop(shared: Arc<MixerShared>) {
    let mut block = Vec::new();
    while !shared.quit.load(Ordering::Acquire) {
        match shared.run_block(&mut block) {
            MixerState::On | MixerState::Muted => {
                shared.final_output.bulk_enqueue(&block);
            }
            MixerState::NoSound | MixerState::Uninitialized => {
                thread::sleep(shared.block_duration());
            }
        }
    }
}

/// The mixer: channels, master bus, output queues and the engine thread.
pub struct MixerContext {
    pub(crate) shared: Arc<MixerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    host: Mutex<Option<Box<dyn AudioHost>>>,
    manual_block: Mutex<Vec<AudioFrame>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MixerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerContext")
            .field("sample_rate_hz", &self.sample_rate())
            .field("blocksize", &self.blocksize())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl MixerContext {
    /// Open the host, configure the master bus and start the engine thread.
    pub fn create(config: MixerConfig, host: Box<dyn AudioHost>) -> Result<Self, MixerError> {
        let ctx = Self::build(config, host);
        let shared = Arc::clone(&ctx.shared);
        let handle = thread::Builder::new()
            .name(MIXER_THREAD_NAME.to_string())
            .spawn(move || mixer_thread_loop(shared))
            .map_err(MixerError::ThreadSpawn)?;
        *ctx.thread.lock() = Some(handle);
        Ok(ctx)
    }

    /// Like [`create`](Self::create) but without a thread; drive it with [`step`](Self::step).
    pub fn create_manual(config: MixerConfig, host: Box<dyn AudioHost>) -> Self {
        Self::build(config, host)
    }

    fn build(config: MixerConfig, mut host: Box<dyn AudioHost>) -> Self {
        init_tracing();
        let mut config = config.sanitized();

        let final_output = Arc::new(RwQueue::new(config.blocksize as usize));
        let rates = Arc::new(MixerRates::new(config.rate, config.blocksize));

        let (state, opened_host) = if config.nosound {
            info!("MIXER: Sound output disabled ('nosound' mode)");
            (MixerState::NoSound, None)
        } else {
            let request = DeviceRequest {
                sample_rate_hz: config.rate,
                blocksize: config.blocksize,
                negotiate: config.negotiate,
            };
            match host.open(&request, OutputReader::new(Arc::clone(&final_output))) {
                Ok(spec) => {
                    if spec.sample_rate_hz != request.sample_rate_hz {
                        info!(
                            "MIXER: Host negotiated the requested sample rate of {} to {} Hz",
                            request.sample_rate_hz, spec.sample_rate_hz
                        );
                        config.rate = spec.sample_rate_hz;
                    }
                    if spec.blocksize != request.blocksize {
                        info!(
                            "MIXER: Host negotiated the requested blocksize of {} to {} frames",
                            request.blocksize, spec.blocksize
                        );
                        config.blocksize = spec.blocksize;
                    }
                    rates.set(config.rate, config.blocksize);
                    final_output.start();
                    (MixerState::On, Some(host))
                }
                Err(err) => {
                    warn!("MIXER: Can't open audio device: {err}; sound output is disabled");
                    (MixerState::NoSound, None)
                }
            }
        };

        let rate = config.rate;
        let blocksize = config.blocksize;
        let prebuffer_ms = config.prebuffer_ms.clamp(1, MAX_PREBUFFER_MS);
        let prebuffer_frames = rate * prebuffer_ms / 1000;
        final_output.resize((blocksize + prebuffer_frames) as usize);

        let mut highpass = StereoFilter::new(FilterKind::HighPass);
        highpass.setup(MASTER_HIGHPASS_ORDER, rate, MASTER_HIGHPASS_CUTOFF_HZ);

        let core = MixerCore {
            config: config.clone(),
            channels: BTreeMap::new(),
            settings_cache: HashMap::new(),
            state,
            is_manually_muted: false,
            prebuffer_ms,
            master_gain: AudioFrame::splat(DEFAULT_MASTER_GAIN),
            highpass,
            do_compressor: false,
            compressor: Compressor::default(),
            do_crossfeed: false,
            crossfeed: CrossfeedSettings {
                preset: CrossfeedPreset::None,
                global_strength: 0.0,
            },
            do_reverb: false,
            reverb: ReverbSettings {
                reverb: Reverb::new(),
                highpass: StereoFilter::new(FilterKind::HighPass),
                preset: ReverbPreset::None,
                synthesizer_send_level: 0.0,
                digital_audio_send_level: 0.0,
                highpass_cutoff_hz: 1.0,
            },
            do_chorus: false,
            chorus: ChorusSettings {
                chorus: Chorus::new(),
                preset: ChorusPreset::None,
                synthesizer_send_level: 0.0,
                digital_audio_send_level: 0.0,
            },
            do_denoiser: false,
            output_buffer: Vec::new(),
            reverb_aux_buffer: Vec::new(),
            chorus_aux_buffer: Vec::new(),
            capture_buffer: Vec::new(),
            capture_frame_counter: 0.0,
            last_mix_ms: monotonic_ms(),
            last_peak: 0.0,
        };

        let ctx = Self {
            shared: Arc::new(MixerShared {
                rates,
                pause_hooks: PauseHooks::default(),
                core: ReentrantMutex::new(RefCell::new(core)),
                final_output,
                capture_queue: RwQueue::new((rate * 2) as usize),
                capturing: AtomicBool::new(false),
                fast_forward: AtomicBool::new(false),
                quit: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
            host: Mutex::new(opened_host),
            manual_block: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };

        ctx.set_reverb_preset(ReverbPreset::from_setting(&config.reverb));
        ctx.set_chorus_preset(ChorusPreset::from_setting(&config.chorus));
        ctx.set_denoiser(config.denoiser);
        ctx.set_compressor(config.compressor);
        ctx.set_crossfeed_preset(CrossfeedPreset::from_setting(&config.crossfeed));
        ctx.shared.with_core(|core| {
            core.config.reverb = core.reverb.preset.as_str().to_string();
            core.config.chorus = core.chorus.preset.as_str().to_string();
            core.config.crossfeed = core.crossfeed.preset.as_str().to_string();
        });

        info!("MIXER: Initialised stereo {rate} Hz audio with {blocksize} sample frame buffer");
        ctx
    }

    /// Run one engine iteration on the calling thread.
    ///
    /// Never blocks on the output queue; frames that do not fit are dropped.
    /// Returns the number of frames queued for the host.
    pub fn step(&self) -> usize {
        let mut block = self.manual_block.lock();
        match self.shared.run_block(&mut block) {
            MixerState::On | MixerState::Muted => {
                self.shared.final_output.nonblocking_bulk_enqueue(&block)
            }
            MixerState::NoSound | MixerState::Uninitialized => 0,
        }
    }

    /// Stop the engine thread, disable every channel and close the host.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_capturing(false);

        self.shared.quit.store(true, Ordering::Release);
        self.shared.final_output.stop();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("MIXER: Mixer thread panicked");
            }
        }

        for channel in self.channels() {
            channel.enable(false);
        }

        if let Some(mut host) = self.host.lock().take() {
            host.close();
        }
        info!("MIXER: Closed audio device");
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Output state.
    pub fn state(&self) -> MixerState {
        self.shared.with_core(|core| core.state)
    }

    fn set_state(&self, core: &mut MixerCore, new_state: MixerState) {
        debug_assert!(matches!(new_state, MixerState::Muted | MixerState::On));
        if new_state == MixerState::Muted {
            self.shared.final_output.clear();
        }
        core.state = new_state;
    }

    /// Mute output; only acts when on.
    pub fn mute(&self) {
        self.shared.with_core(|core| {
            if core.state == MixerState::On {
                self.set_state(core, MixerState::Muted);
                info!("MIXER: Muted audio output");
            }
        });
    }

    /// Unmute output; only acts when muted.
    pub fn unmute(&self) {
        self.shared.with_core(|core| {
            if core.state == MixerState::Muted {
                self.set_state(core, MixerState::On);
                info!("MIXER: Unmuted audio output");
            }
        });
    }

    /// Whether the user muted output by hand.
    pub fn is_manually_muted(&self) -> bool {
        self.shared.with_core(|core| core.is_manually_muted)
    }

    /// User mute toggle.
    pub fn toggle_mute(&self) {
        match self.state() {
            MixerState::NoSound | MixerState::Uninitialized => {
                notify_warning("MIXER", "Mute requested, but sound is disabled ('nosound' mode)");
            }
            MixerState::Muted => {
                self.unmute();
                self.shared.with_core(|core| core.is_manually_muted = false);
            }
            MixerState::On => {
                self.mute();
                self.shared.with_core(|core| core.is_manually_muted = true);
            }
        }
    }

    /// Mix faster than real time, compressing each block.
    pub fn enable_fast_forward_mode(&self) {
        self.shared.fast_forward.store(true, Ordering::Relaxed);
    }

    /// Return to real-time mixing.
    pub fn disable_fast_forward_mode(&self) {
        self.shared.fast_forward.store(false, Ordering::Relaxed);
    }

    /// Whether fast-forward is on.
    pub fn fast_forward_mode_enabled(&self) -> bool {
        self.shared.fast_forward.load(Ordering::Relaxed)
    }

    /// Start or stop feeding the capture queue.
    pub fn set_capturing(&self, capturing: bool) {
        let was_capturing = self.shared.capturing.swap(capturing, Ordering::Relaxed);
        if was_capturing != capturing {
            self.shared.capture_queue.clear();
            self.shared.with_core(|core| core.capture_frame_counter = 0.0);
        }
    }

    /// Whether the capture queue is being fed.
    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::Relaxed)
    }

    /// One millisecond of captured audio as interleaved i16 samples stored little-endian.
    ///
    /// Fractional frames carry over to later ticks; any shortfall is silence.
    pub fn capture_tick(&self) -> Vec<i16> {
        if !self.is_capturing() {
            return Vec::new();
        }
        let frames = self.shared.with_core(|core| {
            core.capture_frame_counter += self.frames_per_tick();
            let whole = core.capture_frame_counter.floor();
            core.capture_frame_counter -= whole;
            whole as usize
        });
        let mut samples = vec![0i16; frames * 2];
        let available = self.shared.capture_queue.size().min(samples.len());
        self.shared
            .capture_queue
            .nonblocking_bulk_dequeue(&mut samples[..available]);
        samples
    }

    /// Master gain pair.
    pub fn master_volume(&self) -> AudioFrame {
        self.shared.with_core(|core| core.master_gain)
    }

    /// Set the master gain pair.
    pub fn set_master_volume(&self, gain: AudioFrame) {
        self.shared.with_core(|core| core.master_gain = gain);
    }

    /// Snapshot of the live configuration, including negotiated values.
    pub fn config(&self) -> MixerConfig {
        self.shared.with_core(|core| core.config.clone())
    }

    /// Apply a runtime setting; acts only when the value changes.
    pub fn update_setting(&self, name: &str, value: &str) -> Result<(), MixerError> {
        let invalid = || MixerError::InvalidPreset {
            setting: name.to_string(),
            value: value.to_string(),
        };
        match name {
            "compressor" | "denoiser" => {
                let Some(enabled) = parse_bool_setting(value) else {
                    notify_warning("MIXER", format!("Invalid '{name}' setting: '{value}'"));
                    return Err(invalid());
                };
                if name == "compressor" {
                    if self.shared.with_core(|core| core.do_compressor) != enabled {
                        self.set_compressor(enabled);
                    }
                } else if self.shared.with_core(|core| core.do_denoiser) != enabled {
                    self.set_denoiser(enabled);
                }
            }
            "crossfeed" => {
                let preset = CrossfeedPreset::from_setting(value);
                if preset != self.crossfeed_preset() {
                    self.set_crossfeed_preset(preset);
                }
            }
            "reverb" => {
                let preset = ReverbPreset::from_setting(value);
                if preset != self.reverb_preset() {
                    self.set_reverb_preset(preset);
                }
            }
            "chorus" => {
                let preset = ChorusPreset::from_setting(value);
                if preset != self.chorus_preset() {
                    self.set_chorus_preset(preset);
                }
            }
            _ => {
                notify_warning("MIXER", format!("Setting '{name}' cannot be changed at runtime"));
                return Err(invalid());
            }
        }
        Ok(())
    }

    /// Negotiated output rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.shared.rates.sample_rate()
    }

    /// Negotiated frames per block.
    pub fn blocksize(&self) -> u32 {
        self.shared.rates.blocksize()
    }

    /// Effective prebuffer in milliseconds.
    pub fn prebuffer_ms(&self) -> u32 {
        self.shared.with_core(|core| core.prebuffer_ms)
    }

    /// Mixer frames per millisecond.
    pub fn frames_per_tick(&self) -> f32 {
        self.shared.rates.frames_per_tick()
    }

    /// Rates shared with channels.
    pub fn rates(&self) -> Arc<MixerRates> {
        Arc::clone(&self.shared.rates)
    }

    /// Frames waiting for the host.
    pub fn queued_frames(&self) -> usize {
        self.shared.final_output.size()
    }

    /// Capacity of the host queue in frames.
    pub fn output_capacity(&self) -> usize {
        self.shared.final_output.max_capacity()
    }

    /// Samples waiting in the capture queue.
    pub fn queued_capture_samples(&self) -> usize {
        self.shared.capture_queue.size()
    }

    /// Peak of the last mixed block in the host range.
    pub fn master_peak(&self) -> f32 {
        self.shared.with_core(|core| core.last_peak)
    }

    /// Whether the master compressor is on.
    pub fn compressor_enabled(&self) -> bool {
        self.shared.with_core(|core| core.do_compressor)
    }

    /// Whether the per-channel denoiser is on.
    pub fn denoiser_enabled(&self) -> bool {
        self.shared.with_core(|core| core.do_denoiser)
    }

    /// A pull-side reader on the host queue, for hosts driven outside [`AudioHost`].
    pub fn output_reader(&self) -> OutputReader {
        OutputReader::new(Arc::clone(&self.shared.final_output))
    }

    pub(crate) fn configure_compressor(core: &mut MixerCore, rate_hz: u32) {
        core.compressor.configure(
            rate_hz,
            MAX_16BIT_SAMPLE_VALUE,
            COMPRESSOR_THRESHOLD_DB,
            COMPRESSOR_RATIO,
            COMPRESSOR_ATTACK_MS,
            COMPRESSOR_RELEASE_MS,
            COMPRESSOR_RMS_WINDOW_MS,
        );
    }

    pub(crate) fn setup_reverb_highpass(core: &mut MixerCore, rate_hz: u32) {
        let cutoff_hz = f64::from(core.reverb.highpass_cutoff_hz);
        core.reverb.highpass.setup(REVERB_HIGHPASS_ORDER, rate_hz, cutoff_hz);
    }
}

impl Drop for MixerContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squash_picks_nearest_frames() {
        let input: Vec<AudioFrame> = (0..8).map(|i| AudioFrame::splat(i as f32)).collect();
        let mut out = Vec::new();
        squash_block(&input, 4, &mut out);
        let picked: Vec<f32> = out.iter().map(|f| f.left).collect();
        assert_eq!(picked, vec![0.0, 2.0, 4.0, 6.0]);

        out.clear();
        squash_block(&input[..3], 4, &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn capture_samples_truncate_and_saturate() {
        assert_eq!(capture_sample(1.9), 1);
        assert_eq!(capture_sample(-1.9), -1);
        assert_eq!(capture_sample(12_345.6), 12_345);
        assert_eq!(capture_sample(40_000.0), i16::MAX);
        assert_eq!(capture_sample(-40_000.0), i16::MIN);
    }

    #[test]
    fn squash_never_reads_past_the_end() {
        let input: Vec<AudioFrame> = (0..5).map(|i| AudioFrame::splat(i as f32)).collect();
        let mut out = Vec::new();
        squash_block(&input, 4, &mut out);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|f| f.left <= 4.0));
    }
}
