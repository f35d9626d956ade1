//! Channel registry, settings cache and master-bus presets.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::info;

use crate::channel::{ChannelHandler, MasterEffects, MixerChannel, MixerChannelPtr};
use crate::config::{ChorusPreset, CrossfeedPreset, ReverbPreset};
use crate::effects::ReverbParams;
use crate::engine::{MixerContext, MixerCore};
use crate::frame::{AudioFrame, ChannelFeature, STEREO_MAP};
use crate::lock::{PauseHookId, PauseThenLock, ProducerPause};

/// Channel that gets crossfeed when it declares Stereo.
pub const OPL_CHANNEL: &str = "OPL";
/// Channel that always gets crossfeed.
pub const CMS_CHANNEL: &str = "CMS";

/// Guard returned by [`MixerContext::lock_mixer_thread`].
///
/// Producers were paused before the engine lock was taken; they resume
/// after the guard drops and the lock is released.
pub struct MixerThreadLock<'a> {
    _guard: PauseThenLock<'a, RefCell<MixerCore>>,
}

struct ReverbPresetValues {
    params: ReverbParams,
    synthesizer_send_level: f32,
    digital_audio_send_level: f32,
    highpass_cutoff_hz: f32,
}

fn crossfeed_strength(preset: CrossfeedPreset) -> f32 {
    match preset {
        CrossfeedPreset::None => 0.0,
        CrossfeedPreset::Light => 0.20,
        CrossfeedPreset::Normal => 0.40,
        CrossfeedPreset::Strong => 0.60,
    }
}

#[rustfmt::skip]
fn reverb_preset_values(preset: ReverbPreset) -> Option<ReverbPresetValues> {
    //                     predelay early  size  density bw    decay damping syn   dig   hpf
    let row = match preset {
        ReverbPreset::None   => return None,
        ReverbPreset::Tiny   => (0.00, 1.00, 0.05, 0.50, 0.50, 0.00, 1.00, 0.65, 0.65, 200.0),
        ReverbPreset::Small  => (0.00, 1.00, 0.17, 0.42, 0.50, 0.50, 0.70, 0.40, 0.08, 200.0),
        ReverbPreset::Medium => (0.00, 0.75, 0.50, 0.50, 0.95, 0.42, 0.21, 0.54, 0.07, 170.0),
        ReverbPreset::Large  => (0.00, 0.75, 0.75, 0.50, 0.95, 0.52, 0.21, 0.70, 0.05, 140.0),
        ReverbPreset::Huge   => (0.00, 0.75, 0.75, 0.50, 0.95, 0.52, 0.21, 0.85, 0.05, 140.0),
    };
    let (predelay, early_mix, size, density, bandwidth, decay, damping, syn, dig, hpf) = row;
    Some(ReverbPresetValues {
        params: ReverbParams { predelay, early_mix, size, density, bandwidth, decay, damping },
        synthesizer_send_level: syn,
        digital_audio_send_level: dig,
        highpass_cutoff_hz: hpf,
    })
}

/// Synth and digital send levels for a chorus preset.
fn chorus_send_levels(preset: ChorusPreset) -> Option<(f32, f32)> {
    match preset {
        ChorusPreset::None => None,
        ChorusPreset::Light => Some((0.33, 0.0)),
        ChorusPreset::Normal => Some((0.54, 0.0)),
        ChorusPreset::Strong => Some((0.75, 0.0)),
    }
}

fn master_effects(core: &MixerCore) -> MasterEffects {
    MasterEffects {
        crossfeed: core.do_crossfeed,
        reverb: core.do_reverb,
        chorus: core.do_chorus,
    }
}

fn apply_global_crossfeed(core: &MixerCore, channel: &MixerChannel) {
    let applies = (channel.name() == OPL_CHANNEL && channel.has_feature(ChannelFeature::Stereo))
        || channel.name() == CMS_CHANNEL;
    if core.do_crossfeed && applies {
        channel.set_crossfeed_strength(core.crossfeed.global_strength);
    } else {
        channel.set_crossfeed_strength(0.0);
    }
}

/// Default send level, or `None` to leave a channel that is neither synth nor digital alone.
fn send_level_for(
    channel: &MixerChannel,
    enabled: bool,
    feature: ChannelFeature,
    synth: f32,
    digital: f32,
) -> Option<f32> {
    if !enabled || !channel.has_feature(feature) {
        Some(0.0)
    } else if channel.has_feature(ChannelFeature::Synthesizer) {
        Some(synth)
    } else if channel.has_feature(ChannelFeature::DigitalAudio) {
        Some(digital)
    } else {
        None
    }
}

fn apply_global_reverb(core: &MixerCore, channel: &MixerChannel) {
    let r = &core.reverb;
    if let Some(level) = send_level_for(
        channel,
        core.do_reverb,
        ChannelFeature::ReverbSend,
        r.synthesizer_send_level,
        r.digital_audio_send_level,
    ) {
        channel.set_reverb_level(level);
    }
}

fn apply_global_chorus(core: &MixerCore, channel: &MixerChannel) {
    let c = &core.chorus;
    if let Some(level) = send_level_for(
        channel,
        core.do_chorus,
        ChannelFeature::ChorusSend,
        c.synthesizer_send_level,
        c.digital_audio_send_level,
    ) {
        channel.set_chorus_level(level);
    }
}

impl MixerContext {
    /// Pause every registered producer, then take the engine lock.
    pub fn lock_mixer_thread(&self) -> MixerThreadLock<'_> {
        MixerThreadLock {
            _guard: PauseThenLock::acquire(&self.shared.pause_hooks, &self.shared.core),
        }
    }

    /// Register a producer to pause around engine-wide changes.
    pub fn register_pause_hook(&self, hook: Arc<dyn ProducerPause>) -> PauseHookId {
        self.shared.pause_hooks.register(hook)
    }

    /// Remove a pause hook; false if it was not registered.
    pub fn deregister_pause_hook(&self, id: PauseHookId) -> bool {
        self.shared.pause_hooks.deregister(id)
    }

    /// Create a channel, replacing any live channel of the same name.
    ///
    /// Settings cached when a channel of this name was deregistered are
    /// restored; otherwise the channel starts disabled with the engine-wide
    /// default sends.
    pub fn add_channel(
        &self,
        handler: ChannelHandler,
        sample_rate_hz: u32,
        name: &str,
        features: impl IntoIterator<Item = ChannelFeature>,
    ) -> MixerChannelPtr {
        let channel = Arc::new(MixerChannel::new(handler, name, features, self.rates()));
        channel.set_sample_rate(sample_rate_hz);
        channel.set_app_volume(AudioFrame::splat(1.0));

        let channel_rate_hz = channel.sample_rate();
        let mixer_rate_hz = self.sample_rate();
        if channel_rate_hz == mixer_rate_hz {
            info!("{name}: Operating at {channel_rate_hz} Hz without resampling");
        } else {
            let direction = if channel_rate_hz > mixer_rate_hz {
                "downsampling"
            } else {
                "upsampling"
            };
            info!("{name}: Operating at {channel_rate_hz} Hz and {direction} to the output rate");
        }

        let _lock = self.lock_mixer_thread();
        self.shared.with_core(|core| {
            match core.settings_cache.remove(name) {
                Some(settings) => channel.set_settings(&settings, master_effects(core)),
                None => {
                    channel.enable(false);
                    channel.set_user_volume(AudioFrame::splat(1.0));
                    channel.set_channel_map(STEREO_MAP);
                    apply_global_crossfeed(core, &channel);
                    apply_global_reverb(core, &channel);
                    apply_global_chorus(core, &channel);
                }
            }
            if core.do_denoiser && channel.has_feature(ChannelFeature::NoiseGate) {
                channel.enable_noise_gate(true);
            }
            core.channels.insert(name.to_string(), Arc::clone(&channel));
        });
        channel
    }

    /// Remove a live channel, caching its settings under its name.
    ///
    /// Returns false when the channel is not registered.
    pub fn deregister_channel(&self, channel: &MixerChannelPtr) -> bool {
        let _lock = self.lock_mixer_thread();
        self.shared.with_core(|core| {
            let found = core
                .channels
                .iter()
                .find(|(_, live)| Arc::ptr_eq(live, channel))
                .map(|(name, _)| name.clone());
            match found {
                Some(name) => {
                    core.settings_cache.insert(name.clone(), channel.get_settings());
                    core.channels.remove(&name);
                    true
                }
                None => false,
            }
        })
    }

    /// Look up a live channel.
    pub fn find_channel(&self, name: &str) -> Option<MixerChannelPtr> {
        self.shared.with_core(|core| core.channels.get(name).cloned())
    }

    /// Snapshot of the live channels in name order.
    pub fn channels(&self) -> Vec<MixerChannelPtr> {
        self.shared.with_core(|core| core.channels.values().cloned().collect())
    }

    /// Active crossfeed preset.
    pub fn crossfeed_preset(&self) -> CrossfeedPreset {
        self.shared.with_core(|core| core.crossfeed.preset)
    }

    /// Active reverb preset.
    pub fn reverb_preset(&self) -> ReverbPreset {
        self.shared.with_core(|core| core.reverb.preset)
    }

    /// Active chorus preset.
    pub fn chorus_preset(&self) -> ChorusPreset {
        self.shared.with_core(|core| core.chorus.preset)
    }

    /// Switch the crossfeed preset and re-derive every channel's strength.
    pub fn set_crossfeed_preset(&self, preset: CrossfeedPreset) {
        if preset == self.crossfeed_preset() {
            return;
        }
        let _lock = self.lock_mixer_thread();
        self.shared.with_core(|core| {
            core.crossfeed.preset = preset;
            if preset != CrossfeedPreset::None {
                core.crossfeed.global_strength = crossfeed_strength(preset);
            }
            core.do_crossfeed = preset != CrossfeedPreset::None;
            for channel in core.channels.values() {
                apply_global_crossfeed(core, channel);
            }
            core.config.crossfeed = preset.as_str().to_string();
            if core.do_crossfeed {
                info!("MIXER: Crossfeed enabled ('{preset}' preset)");
            } else {
                info!("MIXER: Crossfeed disabled");
            }
        });
    }

    /// Switch the reverb preset and re-derive every channel's send.
    pub fn set_reverb_preset(&self, preset: ReverbPreset) {
        if preset == self.reverb_preset() {
            return;
        }
        let rate_hz = self.sample_rate();
        let _lock = self.lock_mixer_thread();
        self.shared.with_core(|core| {
            core.reverb.preset = preset;
            if let Some(values) = reverb_preset_values(preset) {
                let r = &mut core.reverb;
                r.synthesizer_send_level = values.synthesizer_send_level;
                r.digital_audio_send_level = values.digital_audio_send_level;
                r.highpass_cutoff_hz = values.highpass_cutoff_hz;
                r.reverb.set_sample_rate(rate_hz);
                r.reverb.setup(values.params);
                MixerContext::setup_reverb_highpass(core, rate_hz);
            }
            core.do_reverb = preset != ReverbPreset::None;
            for channel in core.channels.values() {
                apply_global_reverb(core, channel);
            }
            core.config.reverb = preset.as_str().to_string();
            if core.do_reverb {
                info!("MIXER: Reverb enabled ('{preset}' preset)");
            } else {
                info!("MIXER: Reverb disabled");
            }
        });
    }

    /// Switch the chorus preset and re-derive every channel's send.
    pub fn set_chorus_preset(&self, preset: ChorusPreset) {
        if preset == self.chorus_preset() {
            return;
        }
        let rate_hz = self.sample_rate();
        let _lock = self.lock_mixer_thread();
        self.shared.with_core(|core| {
            core.chorus.preset = preset;
            if let Some((synth, digital)) = chorus_send_levels(preset) {
                let c = &mut core.chorus;
                c.synthesizer_send_level = synth;
                c.digital_audio_send_level = digital;
                c.chorus.set_sample_rate(rate_hz);
                c.chorus.set_enables_chorus(true, false);
            }
            core.do_chorus = preset != ChorusPreset::None;
            for channel in core.channels.values() {
                apply_global_chorus(core, channel);
            }
            core.config.chorus = preset.as_str().to_string();
            if core.do_chorus {
                info!("MIXER: Chorus enabled ('{preset}' preset)");
            } else {
                info!("MIXER: Chorus disabled");
            }
        });
    }

    /// Turn the master compressor on or off.
    pub fn set_compressor(&self, enabled: bool) {
        let rate_hz = self.sample_rate();
        let _lock = self.lock_mixer_thread();
        self.shared.with_core(|core| {
            core.do_compressor = enabled;
            core.config.compressor = enabled;
            if enabled {
                MixerContext::configure_compressor(core, rate_hz);
                info!("MIXER: Master compressor enabled");
            } else {
                info!("MIXER: Master compressor disabled");
            }
        });
    }

    /// Turn the noise gate on or off for every channel that supports it.
    pub fn set_denoiser(&self, enabled: bool) {
        let _lock = self.lock_mixer_thread();
        self.shared.with_core(|core| {
            core.do_denoiser = enabled;
            core.config.denoiser = enabled;
            for channel in core.channels.values() {
                if channel.has_feature(ChannelFeature::NoiseGate) {
                    channel.enable_noise_gate(enabled);
                }
            }
        });
    }
}
