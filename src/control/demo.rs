use std::sync::{Arc, Weak};

use dasp_signal::{ConstHz, Signal, Sine};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::channel::{ChannelHandler, MixerChannel, MixerChannelPtr, USE_MIXER_RATE};
use crate::frame::ChannelFeature;
use crate::MixerContext;

/// Native sample format a demo device produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToneFormat {
    /// Stereo signed 16-bit, right side at half level.
    Stereo16,
    /// Mono unsigned 8-bit.
    MonoU8,
    /// Mono floats in the canonical domain.
    MonoFloat,
}

/// A device that answers mixer requests with a sine tone.
pub struct ToneDevice {
    format: ToneFormat,
    amplitude: f64,
    signal: Mutex<Sine<ConstHz>>,
    channel: OnceCell<Weak<MixerChannel>>,
}

impl ToneDevice {
    /// Tone at `frequency_hz` rendered at `sample_rate_hz`.
    pub fn new(
        format: ToneFormat,
        sample_rate_hz: u32,
        frequency_hz: f64,
        amplitude: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            format,
            amplitude,
            signal: Mutex::new(
                dasp_signal::rate(f64::from(sample_rate_hz))
                    .const_hz(frequency_hz)
                    .sine(),
            ),
            channel: OnceCell::new(),
        })
    }

    /// Handler to register with the mixer.
    pub fn handler(self: &Arc<Self>) -> ChannelHandler {
        let device = Arc::clone(self);
        Arc::new(move |frames| device.produce(frames))
    }

    /// Bind the channel created for this device.
    pub fn attach(&self, channel: &MixerChannelPtr) {
        let _ = self.channel.set(Arc::downgrade(channel));
    }

    fn produce(&self, frames: usize) {
        let Some(channel) = self.channel.get().and_then(Weak::upgrade) else {
            return;
        };
        let mut signal = self.signal.lock();
        let mut next = || signal.next() * self.amplitude;
        match self.format {
            ToneFormat::Stereo16 => {
                let samples: Vec<i16> = (0..frames)
                    .flat_map(|_| {
                        let s = next();
                        [s as i16, (s * 0.5) as i16]
                    })
                    .collect();
                channel.add_samples_s16(&samples);
            }
            ToneFormat::MonoU8 => {
                let samples: Vec<u8> = (0..frames)
                    .map(|_| (128.0 + next()).clamp(0.0, 255.0) as u8)
                    .collect();
                channel.add_samples_m8(&samples);
            }
            ToneFormat::MonoFloat => {
                let samples: Vec<f32> = (0..frames).map(|_| next() as f32).collect();
                channel.add_samples_mfloat(&samples);
            }
        }
    }
}

fn add_tone(
    ctx: &MixerContext,
    name: &str,
    rate_hz: u32,
    features: &[ChannelFeature],
    format: ToneFormat,
    frequency_hz: f64,
    amplitude: f64,
) -> MixerChannelPtr {
    let render_rate = if rate_hz == USE_MIXER_RATE { ctx.sample_rate() } else { rate_hz };
    let device = ToneDevice::new(format, render_rate, frequency_hz, amplitude);
    let channel = ctx.add_channel(device.handler(), rate_hz, name, features.iter().copied());
    device.attach(&channel);
    channel.enable(true);
    channel
}

/// Register the demo devices used by `mixerctl`.
pub fn spawn_demo_devices(ctx: &MixerContext) -> Vec<MixerChannelPtr> {
    use ChannelFeature::*;

    let opl = add_tone(
        ctx,
        "OPL",
        49_716,
        &[Stereo, Synthesizer, ReverbSend, ChorusSend],
        ToneFormat::Stereo16,
        440.0,
        8_000.0,
    );

    let dac = add_tone(
        ctx,
        "DAC",
        22_050,
        &[DigitalAudio, ReverbSend, ChorusSend, NoiseGate],
        ToneFormat::MonoU8,
        220.0,
        40.0,
    );

    let beeper = add_tone(
        ctx,
        "BEEPER",
        USE_MIXER_RATE,
        &[Sleep],
        ToneFormat::MonoFloat,
        660.0,
        3_000.0,
    );
    let _ = beeper.configure_fade_out("on");

    vec![opl, dac, beeper]
}
