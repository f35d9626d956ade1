use crate::effects::{MIN_DB, db_to_gain, gain_to_db, time_coeff};
use crate::frame::AudioFrame;

/// Feed-forward compressor with an RMS detector.
///
/// Levels are measured relative to `zero_dbfs`; the gain reduction above the
/// threshold follows the attack/release-smoothed overshoot.
#[derive(Clone, Debug)]
pub struct Compressor {
    zero_dbfs: f32,
    threshold_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    rms_coeff: f32,
    mean_square: f32,
    overshoot_db: f32,
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            zero_dbfs: 32767.0,
            threshold_db: 0.0,
            ratio: 1.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            rms_coeff: 0.0,
            mean_square: 0.0,
            overshoot_db: 0.0,
        }
    }
}

impl Compressor {
    /// Configure all parameters and clear the detector state.
    pub fn configure(
        &mut self,
        sample_rate_hz: u32,
        zero_dbfs: f32,
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
        rms_window_ms: f32,
    ) {
        self.zero_dbfs = zero_dbfs.max(1.0);
        self.threshold_db = threshold_db;
        self.ratio = ratio.max(1.0);
        self.attack_coeff = time_coeff(attack_ms, sample_rate_hz);
        self.release_coeff = time_coeff(release_ms, sample_rate_hz);
        self.rms_coeff = time_coeff(rms_window_ms, sample_rate_hz);
        self.reset();
    }

    /// Forget the running level.
    pub fn reset(&mut self) {
        self.mean_square = 0.0;
        self.overshoot_db = 0.0;
    }

    /// Current gain reduction in dB (zero or negative).
    pub fn gain_reduction_db(&self) -> f32 {
        -self.overshoot_db * (1.0 - 1.0 / self.ratio)
    }

    /// Compress one frame.
    #[inline]
    pub fn process(&mut self, frame: AudioFrame) -> AudioFrame {
        let left = frame.left / self.zero_dbfs;
        let right = frame.right / self.zero_dbfs;
        let square = (left * left).max(right * right);
        self.mean_square = square + (self.mean_square - square) * self.rms_coeff;

        let level_db = gain_to_db(self.mean_square.sqrt()).max(MIN_DB);
        let over_db = (level_db - self.threshold_db).max(0.0);
        let coeff = if over_db > self.overshoot_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.overshoot_db = over_db + (self.overshoot_db - over_db) * coeff;

        frame * db_to_gain(self.gain_reduction_db())
    }
}
