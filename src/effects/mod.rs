//! Channel and master-bus effect processors.
//!
//! Every processor works on [`AudioFrame`](crate::frame::AudioFrame) values in
//! the canonical 16-bit-equivalent domain and is configured with the sample
//! rate it runs at.

/// Dual-voice stereo chorus.
pub mod chorus;
/// RMS-detecting master compressor.
pub mod compressor;
/// Peak-detecting noise gate.
pub mod noise_gate;
/// Comb/all-pass network reverb.
pub mod reverb;

pub use chorus::Chorus;
pub use compressor::Compressor;
pub use noise_gate::NoiseGate;
pub use reverb::{Reverb, ReverbParams};

/// Floor used when converting silence to decibels.
pub const MIN_DB: f32 = -120.0;

/// Decibels to a linear gain factor.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Linear gain factor to decibels, floored at [`MIN_DB`].
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= db_to_gain(MIN_DB) {
        MIN_DB
    } else {
        20.0 * gain.log10()
    }
}

/// One-pole smoothing coefficient reaching ~63% of a step after `time_ms`.
pub(crate) fn time_coeff(time_ms: f32, sample_rate_hz: u32) -> f32 {
    let frames = time_ms * 0.001 * sample_rate_hz as f32;
    if frames <= 0.0 {
        0.0
    } else {
        (-1.0 / frames).exp()
    }
}
