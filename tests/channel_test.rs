use std::sync::Arc;

use dosmix::channel::{MasterEffects, MixerChannel, MixerRates};
use dosmix::filter::FilterState;
use dosmix::frame::{Line, REVERSE_MAP, STEREO_MAP, StereoLine};
use dosmix::resample::ResampleMethod;
use dosmix::{AudioFrame, ChannelFeature, ChannelSettings, MixerError, USE_MIXER_RATE};

const SAMPLE_RATE: u32 = 48_000;
const BLOCK_FRAMES: u32 = 512;

fn channel_at(rate_hz: u32, features: &[ChannelFeature]) -> MixerChannel {
    let rates = Arc::new(MixerRates::new(SAMPLE_RATE, BLOCK_FRAMES));
    let channel = MixerChannel::new(Arc::new(|_| {}), "TEST", features.iter().copied(), rates);
    channel.set_sample_rate(rate_hz);
    channel
}

fn stereo_channel() -> MixerChannel {
    channel_at(USE_MIXER_RATE, &[ChannelFeature::Stereo])
}

#[test]
fn gains_multiply_into_combined_volume() {
    let channel = stereo_channel();
    channel.set_user_volume(AudioFrame::new(0.5, 2.0));
    channel.set_app_volume(AudioFrame::new(0.5, 0.25));
    channel.set_0db_scalar(2.0);

    assert_eq!(channel.combined_volume(), AudioFrame::new(0.5, 1.0));
    assert_eq!(channel.db0_volume(), 2.0);
}

#[test]
fn app_volume_is_clamped_per_side() {
    let channel = stereo_channel();
    channel.set_app_volume(AudioFrame::new(-1.0, 3.0));
    assert_eq!(channel.app_volume(), AudioFrame::new(0.0, 1.0));

    // User volume accepts anything.
    channel.set_user_volume(AudioFrame::new(4.0, -1.0));
    assert_eq!(channel.user_volume(), AudioFrame::new(4.0, -1.0));
}

#[test]
fn mixer_rate_sentinel_follows_the_mixer() {
    let channel = stereo_channel();
    assert_eq!(channel.sample_rate(), SAMPLE_RATE);
    assert_eq!(channel.frames_per_tick(), 48.0);
    assert_eq!(channel.frames_per_block(), BLOCK_FRAMES as f32);

    let slow = channel_at(24_000, &[]);
    assert_eq!(slow.frames_per_block(), BLOCK_FRAMES as f32 / 2.0);
    assert!((slow.millis_per_frame() - 1000.0 / 24_000.0).abs() < 1e-12);
}

#[test]
fn silence_padding_is_idempotent() {
    let channel = stereo_channel();
    channel.enable(true);
    channel.mix(64);
    assert_eq!(channel.frames_needed(), 64);

    channel.add_silence();
    assert_eq!(channel.frames_pending(), 64);
    let edges = channel.prev_next_frames();
    channel.add_silence();
    assert_eq!(channel.frames_pending(), 64);
    assert_eq!(channel.prev_next_frames(), edges);
    assert!(channel.pending_frames().iter().all(AudioFrame::is_silent));
}

#[test]
fn silence_ramps_down_from_the_last_frame() {
    let channel = stereo_channel();
    channel.set_peak_amplitude(0);
    channel.enable(true);
    channel.add_samples_s16(&[1_000, -1_000, 1_000, -1_000]);
    assert_eq!(channel.frames_pending(), 2);

    channel.mix(8);
    channel.add_silence();
    let frames = channel.pending_frames();
    assert_eq!(frames.len(), 8);
    assert_eq!(frames[2], AudioFrame::new(1_000.0, -1_000.0));
    for pair in frames[2..].windows(2) {
        assert!(pair[1].left <= pair[0].left && pair[1].left > 0.0);
        assert!(pair[1].right >= pair[0].right && pair[1].right < 0.0);
    }
}

#[test]
fn disabling_drops_pending_audio() {
    let channel = stereo_channel();
    channel.enable(true);
    channel.add_samples_s16(&[100, 100, 200, 200, 300, 300]);
    assert_eq!(channel.frames_pending(), 3);

    channel.enable(false);
    assert_eq!(channel.frames_pending(), 0);
    assert_eq!(channel.prev_next_frames(), (AudioFrame::ZERO, AudioFrame::ZERO));

    // Mixing a disabled channel asks for nothing.
    channel.mix(32);
    assert_eq!(channel.frames_pending(), 0);
}

#[test]
fn custom_filters_parse_and_apply() {
    let channel = stereo_channel();

    channel.try_parse_and_set_custom_filter("lpf 2 12000").expect("single filter");
    assert_eq!(channel.low_pass_filter_state(), FilterState::On);
    assert_eq!(channel.high_pass_filter_state(), FilterState::Off);
    assert_eq!(channel.low_pass_filter().order, 2);
    assert_eq!(channel.low_pass_filter().cutoff_hz, 12_000);

    channel.try_parse_and_set_custom_filter("hpf 3 120 lpf 1 6000").expect("filter pair");
    assert_eq!(channel.high_pass_filter().cutoff_hz, 120);
    assert_eq!(channel.high_pass_filter_state(), FilterState::On);
    assert_eq!(channel.low_pass_filter_state(), FilterState::On);
}

#[test]
fn custom_filters_accept_any_whitespace() {
    let channel = stereo_channel();
    channel
        .try_parse_and_set_custom_filter("hpf  3\t120   lpf 1  6000")
        .expect("loosely spaced pair");
    assert_eq!(channel.high_pass_filter().order, 3);
    assert_eq!(channel.high_pass_filter().cutoff_hz, 120);
    assert_eq!(channel.low_pass_filter().cutoff_hz, 6_000);
    assert_eq!(channel.high_pass_filter_state(), FilterState::On);
    assert_eq!(channel.low_pass_filter_state(), FilterState::On);
}

#[test]
fn bad_custom_filters_leave_both_off() {
    let channel = stereo_channel();
    let cases: [(&str, fn(&MixerError) -> bool); 6] = [
        ("lpf 2 12000 lpf 1 6000", |e| matches!(e, MixerError::DuplicateFilter(_))),
        ("hpf 0 100", |e| matches!(e, MixerError::InvalidFilterOrder { .. })),
        ("hpf 17 100", |e| matches!(e, MixerError::InvalidFilterOrder { .. })),
        ("hpf 2 -5", |e| matches!(e, MixerError::InvalidFilterCutoff { .. })),
        ("bogus 1 2", |e| matches!(e, MixerError::InvalidFilter(_))),
        ("hpf 2 120 xyz 1 6000", |e| matches!(e, MixerError::InvalidFilterType(_))),
    ];

    for (prefs, expected) in cases {
        channel.try_parse_and_set_custom_filter("hpf 1 80").expect("reset");
        let err = channel
            .try_parse_and_set_custom_filter(prefs)
            .expect_err("definition should be rejected");
        assert!(expected(&err), "'{prefs}' gave unexpected error {err:?}");
        assert_eq!(channel.high_pass_filter_state(), FilterState::Off, "'{prefs}'");
        assert_eq!(channel.low_pass_filter_state(), FilterState::Off, "'{prefs}'");
    }
}

#[test]
fn filter_cutoff_is_clamped_below_nyquist() {
    let channel = stereo_channel();
    channel.configure_low_pass_filter(2, 30_000);
    assert_eq!(channel.low_pass_filter().cutoff_hz, SAMPLE_RATE / 2 - 1);
    channel.configure_high_pass_filter(4, 200);
    assert_eq!(channel.high_pass_filter().cutoff_hz, 200);
}

#[test]
fn crossfeed_needs_stereo_and_positive_strength() {
    let stereo = stereo_channel();
    stereo.set_crossfeed_strength(0.4);
    assert!(stereo.crossfeed_enabled());
    let (left, right) = stereo.crossfeed_pans();
    assert!((left - 0.2).abs() < 1e-6 && (right - 0.8).abs() < 1e-6);

    // Full strength collapses both sides to the centre.
    stereo.set_crossfeed_strength(1.0);
    assert_eq!(stereo.crossfeed_pans(), (0.5, 0.5));

    stereo.set_crossfeed_strength(0.0);
    assert!(!stereo.crossfeed_enabled());
    assert_eq!(stereo.crossfeed_strength(), 0.0);

    let mono = channel_at(USE_MIXER_RATE, &[]);
    mono.set_crossfeed_strength(0.4);
    assert!(!mono.crossfeed_enabled());
    assert_eq!(mono.crossfeed_strength(), 0.0);
}

#[test]
fn sends_require_their_feature() {
    let with_sends = channel_at(
        USE_MIXER_RATE,
        &[ChannelFeature::ReverbSend, ChannelFeature::ChorusSend],
    );
    with_sends.set_reverb_level(0.5);
    with_sends.set_chorus_level(0.25);
    assert_eq!(with_sends.reverb_level(), 0.5);
    assert_eq!(with_sends.chorus_level(), 0.25);

    let plain = channel_at(USE_MIXER_RATE, &[]);
    plain.set_reverb_level(0.5);
    plain.set_chorus_level(0.5);
    assert_eq!(plain.reverb_level(), 0.0);
    assert_eq!(plain.chorus_level(), 0.0);
}

#[test]
fn lineout_descriptions() {
    assert_eq!(channel_at(USE_MIXER_RATE, &[]).describe_lineout(), "mono");

    let channel = stereo_channel();
    assert_eq!(channel.describe_lineout(), "stereo");
    channel.set_lineout_map(REVERSE_MAP);
    assert_eq!(channel.describe_lineout(), "reverse");
    channel.set_lineout_map(StereoLine {
        left: Line::Left,
        right: Line::Left,
    });
    assert_eq!(channel.describe_lineout(), "unknown");
}

#[test]
fn reverse_lineout_swaps_sides() {
    let channel = stereo_channel();
    channel.set_peak_amplitude(0);
    channel.set_lineout_map(REVERSE_MAP);
    channel.enable(true);
    channel.add_samples_s16(&[100, 200, 100, 200]);
    assert_eq!(channel.pending_frames()[1], AudioFrame::new(200.0, 100.0));
}

#[test]
fn sample_formats_land_in_the_canonical_domain() {
    let channel = channel_at(USE_MIXER_RATE, &[]);
    channel.set_peak_amplitude(0);
    channel.enable(true);

    channel.add_samples_m8(&[128, 255]);
    channel.add_samples_m8s(&[-128]);
    channel.add_samples_m16(&[1_234]);
    channel.add_samples_m16_nonnative(&[1_000i16.swap_bytes()]);
    channel.add_samples_mfloat(&[-42.0, 0.0]);

    let lefts: Vec<f32> = channel.pending_frames().iter().map(|f| f.left).collect();
    // Every ingest emits the frame before the one it decodes.
    assert_eq!(lefts, vec![0.0, 0.0, 32_767.0, -32_768.0, 1_234.0, 1_000.0, -42.0]);
}

#[test]
fn fade_out_preferences_are_validated() {
    let channel = channel_at(USE_MIXER_RATE, &[ChannelFeature::Sleep]);
    for good in ["on", "off", "100 10", "5000 3000"] {
        assert!(channel.configure_fade_out(good).is_ok(), "'{good}' rejected");
    }
    for bad in ["99 10", "100 9", "5001 100", "100 3001", "soon", "1 2 3"] {
        let err = channel.configure_fade_out(bad).expect_err("should be rejected");
        assert!(matches!(err, MixerError::InvalidFadeOut(ref v) if v == bad));
    }
}

#[test]
fn default_method_picks_lerp_or_sinc() {
    let slow = channel_at(22_050, &[]);
    let path = slow.rate_path();
    assert!(path.lerp_upsample && !path.resample);

    let fast = channel_at(96_000, &[]);
    let path = fast.rate_path();
    assert!(!path.lerp_upsample && path.resample);

    let native = stereo_channel();
    assert_eq!(native.rate_path().describe(), "none");
}

#[test]
fn explicit_resample_method_uses_sinc_for_upsampling() {
    let channel = channel_at(22_050, &[ChannelFeature::Stereo]);
    channel.set_resample_method(ResampleMethod::Resample);
    let path = channel.rate_path();
    assert!(path.resample);
    assert!(!path.lerp_upsample && !path.zoh_upsample);
    assert_eq!(path.describe(), "sinc");
}

fn sinc_channel(rate_hz: u32) -> MixerChannel {
    let channel = channel_at(rate_hz, &[]);
    channel.set_resample_method(ResampleMethod::Resample);
    channel.set_peak_amplitude(0);
    channel.enable(true);
    channel
}

fn pending_after_one_second(channel: &MixerChannel, rate_hz: u32) -> usize {
    let before = channel.frames_pending();
    channel.add_samples_m16(&vec![1_000i16; rate_hz as usize]);
    channel.frames_pending() - before
}

#[test]
fn rate_change_retargets_the_sinc_resampler() {
    let channel = sinc_channel(22_050);
    assert!(channel.rate_path().resample);

    channel.set_sample_rate(11_025);
    let produced = pending_after_one_second(&channel, 11_025);
    assert!((47_000..=48_100).contains(&produced), "one second became {produced} frames");
}

#[test]
fn enable_cycle_after_rate_change_keeps_the_new_rate() {
    let channel = sinc_channel(22_050);
    channel.set_sample_rate(32_000);
    channel.enable(false);
    channel.enable(true);

    let produced = pending_after_one_second(&channel, 32_000);
    assert!((47_000..=48_100).contains(&produced), "one second became {produced} frames");
}

#[test]
fn restart_leaves_no_audio_in_the_resampler() {
    let channel = sinc_channel(22_050);
    let loud: Vec<i16> = (0..4_096)
        .map(|n| if (n / 10) % 2 == 0 { 30_000 } else { -30_000 })
        .collect();
    channel.add_samples_m16(&loud);
    assert!(channel.pending_frames().iter().any(|f| f.peak() > 1_000.0));

    channel.enable(false);
    channel.enable(true);
    assert_eq!(channel.frames_pending(), 0);

    channel.add_samples_m16(&[0; 4_096]);
    let frames = channel.pending_frames();
    assert!(!frames.is_empty());
    let peak = frames.iter().map(AudioFrame::peak).fold(0.0f32, f32::max);
    assert!(peak < 1e-3, "leftover energy after restart: {peak}");
}

#[test]
fn zero_order_hold_targets_its_rate() {
    let channel = channel_at(8_000, &[]);
    channel.set_zero_order_hold_upsampler_target_rate(SAMPLE_RATE);
    channel.set_resample_method(ResampleMethod::ZeroOrderHoldAndResample);
    assert_eq!(channel.rate_path().describe(), "zoh");

    channel.set_peak_amplitude(0);
    channel.enable(true);
    channel.add_samples_m16(&[600, 600, 600, 600]);
    // Each source frame is held for about six output frames.
    let pending = channel.frames_pending();
    assert!((24..=28).contains(&pending), "unexpected hold length: {pending} frames");

    channel.set_zero_order_hold_upsampler_target_rate(32_000);
    assert_eq!(channel.rate_path().describe(), "zoh+sinc");
}

#[test]
fn settings_restore_sends_only_for_active_effects() {
    let channel = channel_at(USE_MIXER_RATE, &[ChannelFeature::Stereo, ChannelFeature::ReverbSend]);
    let settings = ChannelSettings {
        is_enabled: true,
        user_volume: AudioFrame::new(0.25, 0.75),
        lineout_map: REVERSE_MAP,
        crossfeed_strength: 0.3,
        reverb_level: 0.6,
        chorus_level: 0.0,
    };

    channel.set_settings(&settings, MasterEffects::default());
    assert!(channel.is_enabled());
    assert_eq!(channel.user_volume(), AudioFrame::new(0.25, 0.75));
    assert_eq!(channel.lineout_map(), REVERSE_MAP);
    assert_eq!(channel.reverb_level(), 0.0);
    assert_eq!(channel.crossfeed_strength(), 0.0);

    channel.set_settings(
        &settings,
        MasterEffects {
            crossfeed: true,
            reverb: true,
            chorus: false,
        },
    );
    assert_eq!(channel.get_settings(), settings);
    assert_ne!(channel.lineout_map(), STEREO_MAP);
}

#[test]
fn status_reports_channel_state() {
    let channel = channel_at(22_050, &[ChannelFeature::Stereo]);
    channel.set_user_volume(AudioFrame::splat(0.5));
    let status = channel.status();
    assert_eq!(status.name, "TEST");
    assert_eq!(status.sample_rate_hz, 22_050);
    assert!(!status.is_enabled);
    assert_eq!(status.lineout, "stereo");
    assert_eq!(status.rate_path, "lerp");
    assert_eq!(status.user_volume, AudioFrame::splat(0.5));
}
