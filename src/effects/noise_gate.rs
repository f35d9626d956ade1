use crate::effects::{db_to_gain, time_coeff};
use crate::frame::AudioFrame;

/// Default gate threshold in dB relative to full scale.
pub const DEFAULT_THRESHOLD_DB: f32 = -60.0;
/// Default gate attack in milliseconds.
pub const DEFAULT_ATTACK_MS: f32 = 1.0;
/// Default gate release in milliseconds.
pub const DEFAULT_RELEASE_MS: f32 = 20.0;

/// Closes on signals whose peak falls below the threshold.
#[derive(Clone, Debug)]
pub struct NoiseGate {
    threshold: f32,
    attack_coeff: f32,
    release_coeff: f32,
    gain: f32,
}

impl Default for NoiseGate {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gain: 1.0,
        }
    }
}

impl NoiseGate {
    /// Derive the threshold and smoothing constants; the gate starts open.
    pub fn configure(
        &mut self,
        sample_rate_hz: u32,
        zero_dbfs: f32,
        threshold_db: f32,
        attack_ms: f32,
        release_ms: f32,
    ) {
        self.threshold = zero_dbfs * db_to_gain(threshold_db);
        self.attack_coeff = time_coeff(attack_ms, sample_rate_hz);
        self.release_coeff = time_coeff(release_ms, sample_rate_hz);
        self.gain = 1.0;
    }

    /// Current gate gain in `0.0..=1.0`.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Gate one frame.
    #[inline]
    pub fn process(&mut self, frame: AudioFrame) -> AudioFrame {
        let target = if frame.peak() >= self.threshold { 1.0 } else { 0.0 };
        let coeff = if target > self.gain {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.gain = target + (self.gain - target) * coeff;
        frame * self.gain
    }
}
