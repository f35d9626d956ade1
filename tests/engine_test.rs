use std::sync::Arc;

use parking_lot::Mutex;

use dosmix::config::{ChorusPreset, CrossfeedPreset, ReverbPreset};
use dosmix::control::{api, demo};
use dosmix::host::{AudioHost, DeviceRequest, DeviceSpec, OutputReader};
use dosmix::lock::ProducerPause;
use dosmix::resample::ResampleMethod;
use dosmix::{
    AudioFrame, ChannelFeature, MixerConfig, MixerContext, MixerError, MixerState, USE_MIXER_RATE,
    pop_notification,
};

const SAMPLE_RATE: u32 = 48_000;
const BLOCK_FRAMES: u32 = 512;
const NO_FEATURES: [ChannelFeature; 0] = [];

#[derive(Clone, Default)]
struct HostLog(Arc<Mutex<Vec<String>>>);

impl HostLog {
    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Host double that records calls and hands out a fixed device spec.
struct RecordingHost {
    log: HostLog,
    spec: Option<DeviceSpec>,
    reader: Arc<Mutex<Option<OutputReader>>>,
}

impl RecordingHost {
    fn accepting(log: &HostLog) -> Self {
        Self {
            log: log.clone(),
            spec: None,
            reader: Arc::default(),
        }
    }

    fn with_spec(log: &HostLog, spec: DeviceSpec) -> Self {
        Self {
            spec: Some(spec),
            ..Self::accepting(log)
        }
    }

    fn failing(log: &HostLog) -> Self {
        Self {
            spec: Some(DeviceSpec {
                sample_rate_hz: 0,
                blocksize: 0,
            }),
            ..Self::accepting(log)
        }
    }
}

impl AudioHost for RecordingHost {
    fn open(
        &mut self,
        request: &DeviceRequest,
        reader: OutputReader,
    ) -> Result<DeviceSpec, MixerError> {
        self.log
            .0
            .lock()
            .push(format!("open {} {}", request.sample_rate_hz, request.blocksize));
        let spec = self.spec.unwrap_or(DeviceSpec {
            sample_rate_hz: request.sample_rate_hz,
            blocksize: request.blocksize,
        });
        if spec.sample_rate_hz == 0 {
            return Err(MixerError::DeviceUnavailable("no device".to_string()));
        }
        *self.reader.lock() = Some(reader);
        Ok(spec)
    }

    fn close(&mut self) {
        self.log.0.lock().push("close".to_string());
        self.reader.lock().take();
    }
}

fn config() -> MixerConfig {
    MixerConfig {
        rate: SAMPLE_RATE,
        blocksize: BLOCK_FRAMES,
        compressor: false,
        denoiser: false,
        ..MixerConfig::default()
    }
}

fn manual_mixer() -> (MixerContext, HostLog) {
    let log = HostLog::default();
    let ctx = MixerContext::create_manual(config(), Box::new(RecordingHost::accepting(&log)));
    (ctx, log)
}

fn silent_handler() -> dosmix::channel::ChannelHandler {
    Arc::new(|_| {})
}

#[test]
fn host_negotiation_updates_rates() {
    let log = HostLog::default();
    let spec = DeviceSpec {
        sample_rate_hz: 44_100,
        blocksize: 256,
    };
    let ctx = MixerContext::create_manual(config(), Box::new(RecordingHost::with_spec(&log, spec)));

    assert_eq!(log.entries(), vec!["open 48000 512".to_string()]);
    assert_eq!(ctx.state(), MixerState::On);
    assert_eq!((ctx.sample_rate(), ctx.blocksize()), (44_100, 256));
    assert_eq!(ctx.config().rate, 44_100);
    assert_eq!(ctx.output_capacity(), 256 + 44_100 * 20 / 1000);

    let channel = ctx.add_channel(silent_handler(), USE_MIXER_RATE, "PCSPEAKER", NO_FEATURES);
    assert_eq!(channel.sample_rate(), 44_100);
}

#[test]
fn failed_open_falls_back_to_nosound() {
    let log = HostLog::default();
    let ctx = MixerContext::create_manual(config(), Box::new(RecordingHost::failing(&log)));
    assert_eq!(ctx.state(), MixerState::NoSound);
    assert_eq!(ctx.step(), 0);

    ctx.close();
    assert_eq!(log.entries(), vec!["open 48000 512".to_string()], "failed host must not be closed");
}

#[test]
fn nosound_never_opens_the_host_and_refuses_mute() {
    let log = HostLog::default();
    let ctx = MixerContext::create_manual(
        MixerConfig {
            nosound: true,
            ..config()
        },
        Box::new(RecordingHost::accepting(&log)),
    );
    assert!(log.entries().is_empty());
    assert_eq!(ctx.state(), MixerState::NoSound);

    ctx.toggle_mute();
    assert_eq!(ctx.state(), MixerState::NoSound);
    assert!(!ctx.is_manually_muted());
    let warned = std::iter::from_fn(pop_notification)
        .any(|n| n.source == "MIXER" && n.message.contains("nosound"));
    assert!(warned, "expected a nosound notification");
}

#[test]
fn mute_round_trip() {
    let (ctx, _log) = manual_mixer();
    assert_eq!(ctx.state(), MixerState::On);

    ctx.mute();
    assert_eq!(ctx.state(), MixerState::Muted);
    ctx.unmute();
    assert!(!ctx.is_manually_muted());

    ctx.toggle_mute();
    assert_eq!(ctx.state(), MixerState::Muted);
    assert!(ctx.is_manually_muted());

    // Automatic unmute does not clear the manual flag.
    ctx.unmute();
    assert_eq!(ctx.state(), MixerState::On);
    assert!(ctx.is_manually_muted());

    ctx.mute();
    ctx.toggle_mute();
    assert_eq!(ctx.state(), MixerState::On);
    assert!(!ctx.is_manually_muted());

    ctx.unmute();
    assert_eq!(ctx.state(), MixerState::On);
}

#[test]
fn muting_flushes_queued_output() {
    let (ctx, _log) = manual_mixer();
    ctx.step();
    ctx.step();
    assert_eq!(ctx.queued_frames(), 2 * BLOCK_FRAMES as usize);

    ctx.mute();
    assert_eq!(ctx.queued_frames(), 0);
}

#[test]
fn manual_steps_never_overfill_the_queue() {
    let (ctx, _log) = manual_mixer();
    let capacity = ctx.output_capacity();
    for _ in 0..8 {
        ctx.step();
    }
    assert_eq!(ctx.queued_frames(), capacity);
}

#[test]
fn deregistered_settings_are_restored_once() {
    let (ctx, _log) = manual_mixer();
    let features = [ChannelFeature::DigitalAudio];

    let dac = ctx.add_channel(silent_handler(), 22_050, "DAC", features);
    assert!(!dac.is_enabled());
    assert_eq!(dac.user_volume(), AudioFrame::splat(1.0));
    dac.set_user_volume(AudioFrame::new(0.3, 0.4));
    dac.enable(true);

    assert!(ctx.deregister_channel(&dac));
    assert!(!ctx.deregister_channel(&dac));
    assert!(ctx.find_channel("DAC").is_none());

    let restored = ctx.add_channel(silent_handler(), 22_050, "DAC", features);
    assert!(restored.is_enabled());
    assert_eq!(restored.user_volume(), AudioFrame::new(0.3, 0.4));
    assert_eq!(restored.app_volume(), AudioFrame::splat(1.0));

    // The cache entry was consumed.
    let replacement = ctx.add_channel(silent_handler(), 22_050, "DAC", features);
    assert!(!replacement.is_enabled());
    assert_eq!(replacement.user_volume(), AudioFrame::splat(1.0));
}

#[test]
fn adding_a_channel_twice_replaces_it() {
    let (ctx, _log) = manual_mixer();
    let first = ctx.add_channel(silent_handler(), USE_MIXER_RATE, "GUS", NO_FEATURES);
    let second = ctx.add_channel(silent_handler(), USE_MIXER_RATE, "GUS", NO_FEATURES);

    let live = ctx.find_channel("GUS").expect("channel registered");
    assert!(Arc::ptr_eq(&live, &second));
    assert!(!Arc::ptr_eq(&live, &first));
    assert_eq!(ctx.channels().len(), 1);
}

#[test]
fn channels_are_listed_by_name() {
    let (ctx, _log) = manual_mixer();
    for name in ["SB", "CDAUDIO", "OPL"] {
        ctx.add_channel(silent_handler(), USE_MIXER_RATE, name, NO_FEATURES);
    }
    let names: Vec<String> = ctx.channels().iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, vec!["CDAUDIO", "OPL", "SB"]);
}

#[derive(Default)]
struct Producer {
    log: Mutex<Vec<&'static str>>,
}

impl ProducerPause for Producer {
    fn pause(&self) {
        self.log.lock().push("pause");
    }

    fn resume(&self) {
        self.log.lock().push("resume");
    }
}

#[test]
fn mixer_lock_pauses_producers() {
    let (ctx, _log) = manual_mixer();
    let producer = Arc::new(Producer::default());
    let id = ctx.register_pause_hook(producer.clone());

    {
        let _lock = ctx.lock_mixer_thread();
        assert_eq!(*producer.log.lock(), vec!["pause"]);
        // Re-entrant for the owning thread.
        assert_eq!(ctx.state(), MixerState::On);
    }
    assert_eq!(*producer.log.lock(), vec!["pause", "resume"]);

    ctx.set_reverb_preset(ReverbPreset::Small);
    assert_eq!(producer.log.lock().len(), 4);

    assert!(ctx.deregister_pause_hook(id));
    assert!(!ctx.deregister_pause_hook(id));
    ctx.set_reverb_preset(ReverbPreset::None);
    assert_eq!(producer.log.lock().len(), 4);
}

#[test]
fn presets_drive_channel_sends() {
    let (ctx, _log) = manual_mixer();
    let opl = ctx.add_channel(
        silent_handler(),
        49_716,
        "OPL",
        [
            ChannelFeature::Stereo,
            ChannelFeature::Synthesizer,
            ChannelFeature::ReverbSend,
            ChannelFeature::ChorusSend,
        ],
    );
    let sb = ctx.add_channel(
        silent_handler(),
        22_050,
        "SB",
        [
            ChannelFeature::Stereo,
            ChannelFeature::DigitalAudio,
            ChannelFeature::ReverbSend,
            ChannelFeature::ChorusSend,
        ],
    );
    assert_eq!(opl.reverb_level(), 0.0);

    ctx.set_reverb_preset(ReverbPreset::Medium);
    assert_eq!(opl.reverb_level(), 0.54);
    assert_eq!(sb.reverb_level(), 0.07);

    ctx.set_chorus_preset(ChorusPreset::Strong);
    assert_eq!(opl.chorus_level(), 0.75);
    assert_eq!(sb.chorus_level(), 0.0);

    ctx.set_crossfeed_preset(CrossfeedPreset::Normal);
    assert_eq!(opl.crossfeed_strength(), 0.4);
    assert_eq!(sb.crossfeed_strength(), 0.0);

    ctx.set_reverb_preset(ReverbPreset::None);
    assert_eq!(opl.reverb_level(), 0.0);
    assert_eq!(ctx.config().reverb, "off");

    // New channels pick up the active presets.
    let cms = ctx.add_channel(silent_handler(), 22_050, "CMS", [ChannelFeature::Stereo]);
    assert_eq!(cms.crossfeed_strength(), 0.4);
}

#[test]
fn sends_survive_a_restart_only_while_the_effect_is_on() {
    let (ctx, _log) = manual_mixer();
    let features = [ChannelFeature::Synthesizer, ChannelFeature::ReverbSend];
    ctx.set_reverb_preset(ReverbPreset::Large);

    let synth = ctx.add_channel(silent_handler(), USE_MIXER_RATE, "MT32", features);
    synth.set_reverb_level(0.2);
    assert!(ctx.deregister_channel(&synth));
    let synth = ctx.add_channel(silent_handler(), USE_MIXER_RATE, "MT32", features);
    assert_eq!(synth.reverb_level(), 0.2);

    assert!(ctx.deregister_channel(&synth));
    ctx.set_reverb_preset(ReverbPreset::None);
    let synth = ctx.add_channel(silent_handler(), USE_MIXER_RATE, "MT32", features);
    assert_eq!(synth.reverb_level(), 0.0);
}

#[test]
fn runtime_settings_apply_changes() {
    let (ctx, _log) = manual_mixer();

    ctx.update_setting("reverb", "large").expect("valid reverb preset");
    assert_eq!(ctx.reverb_preset(), ReverbPreset::Large);
    ctx.update_setting("chorus", "on").expect("valid chorus preset");
    assert_eq!(ctx.chorus_preset(), ChorusPreset::Normal);
    ctx.update_setting("crossfeed", "nonsense").expect("falls back to off");
    assert_eq!(ctx.crossfeed_preset(), CrossfeedPreset::None);

    ctx.update_setting("compressor", "on").expect("valid bool");
    assert!(ctx.compressor_enabled());
    assert!(ctx.config().compressor);

    assert!(matches!(
        ctx.update_setting("denoiser", "maybe"),
        Err(MixerError::InvalidPreset { .. })
    ));
    assert!(ctx.update_setting("rate", "44100").is_err());
}

#[test]
fn denoiser_gates_supporting_channels() {
    let (ctx, _log) = manual_mixer();
    let gated = ctx.add_channel(silent_handler(), 22_050, "DAC", [ChannelFeature::NoiseGate]);
    let plain = ctx.add_channel(silent_handler(), 22_050, "PS1", NO_FEATURES);
    assert!(!gated.noise_gate_enabled());

    ctx.set_denoiser(true);
    assert!(gated.noise_gate_enabled());
    assert!(!plain.noise_gate_enabled());

    let late = ctx.add_channel(silent_handler(), 22_050, "COVOX", [ChannelFeature::NoiseGate]);
    assert!(late.noise_gate_enabled());
}

#[test]
fn capture_ticks_return_one_millisecond() {
    let (ctx, _log) = manual_mixer();
    assert!(ctx.capture_tick().is_empty());

    ctx.set_capturing(true);
    ctx.step();
    assert_eq!(ctx.queued_capture_samples(), 2 * BLOCK_FRAMES as usize);

    let tick = ctx.capture_tick();
    assert_eq!(tick.len(), 2 * 48);
    assert!(tick.iter().all(|&s| s == 0));
    assert_eq!(ctx.queued_capture_samples(), 2 * (BLOCK_FRAMES as usize - 48));

    ctx.set_capturing(false);
    assert_eq!(ctx.queued_capture_samples(), 0);
}

#[test]
fn fast_forward_toggles() {
    let (ctx, _log) = manual_mixer();
    assert!(!ctx.fast_forward_mode_enabled());
    ctx.enable_fast_forward_mode();
    assert!(ctx.fast_forward_mode_enabled());
    assert_eq!(ctx.step(), BLOCK_FRAMES as usize);
    ctx.disable_fast_forward_mode();
    assert!(!ctx.fast_forward_mode_enabled());
}

#[test]
fn close_is_idempotent_and_disables_channels() {
    let (ctx, log) = manual_mixer();
    let channel = ctx.add_channel(silent_handler(), USE_MIXER_RATE, "SB", NO_FEATURES);
    channel.enable(true);

    ctx.close();
    ctx.close();
    assert!(ctx.is_closed());
    assert!(!channel.is_enabled());
    assert_eq!(log.entries().iter().filter(|e| *e == "close").count(), 1);
}

#[test]
fn threaded_mixer_feeds_the_host() {
    let log = HostLog::default();
    let host = RecordingHost::accepting(&log);
    let reader = Arc::clone(&host.reader);
    let ctx = MixerContext::create(config(), Box::new(host)).expect("mixer thread");

    let mut block = vec![0.0f32; BLOCK_FRAMES as usize * 2];
    let mut pulled = 0;
    for _ in 0..200 {
        if let Some(reader) = reader.lock().as_mut() {
            pulled += reader.fill_interleaved(&mut block);
        }
        if pulled >= BLOCK_FRAMES as usize {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(pulled >= BLOCK_FRAMES as usize, "engine thread produced {pulled} frames");

    ctx.close();
    assert!(log.entries().contains(&"close".to_string()));
}

#[test]
fn resampled_channel_restarts_from_silence() {
    let (ctx, _log) = manual_mixer();
    let channel = ctx.add_channel(silent_handler(), 22_050, "SB", [ChannelFeature::Stereo]);
    channel.set_resample_method(ResampleMethod::Resample);
    channel.set_peak_amplitude(0);
    let path = channel.rate_path();
    assert!(path.resample);
    assert!(!path.lerp_upsample);

    channel.enable(true);
    let loud: Vec<i16> = (0..8_192)
        .map(|n| if (n / 20) % 2 == 0 { 28_000 } else { -28_000 })
        .collect();
    channel.add_samples_s16(&loud);
    assert!(channel.pending_frames().iter().any(|f| f.peak() > 1_000.0));

    channel.enable(false);
    assert_eq!(channel.frames_pending(), 0);
    channel.enable(true);
    assert_eq!(channel.frames_pending(), 0);

    channel.add_samples_s16(&[0; 8_192]);
    let frames = channel.pending_frames();
    assert!(!frames.is_empty());
    let leftover = frames.iter().map(AudioFrame::peak).fold(0.0f32, f32::max);
    assert!(leftover < 1e-3, "old audio leaked through the restart: {leftover}");
}

#[test]
fn status_snapshot_lists_channels() {
    let (ctx, _log) = manual_mixer();
    let channels = demo::spawn_demo_devices(&ctx);
    assert_eq!(channels.len(), 3);
    ctx.step();

    let status = api::status(&ctx);
    assert_eq!(status.sample_rate_hz, SAMPLE_RATE);
    assert_eq!(status.state, MixerState::On);
    assert_eq!(status.channels.len(), 3);
    assert!(status.queue_fill > 0.0);

    api::set_user_volume_db(&ctx, "DAC", -6.0).expect("known channel");
    let dac = ctx.find_channel("DAC").expect("demo DAC");
    assert!((dac.user_volume().left - 0.501).abs() < 1e-3);
    assert!(matches!(
        api::set_enabled(&ctx, "NOPE", true),
        Err(MixerError::UnknownChannel(_))
    ));

    assert_eq!(api::cycle_reverb(&ctx), "tiny");
    assert_eq!(api::cycle_chorus(&ctx), "light");
    assert_eq!(api::cycle_crossfeed(&ctx), "light");
}
