//! Butterworth high-pass and low-pass filters.
//!
//! Filters of order 1..=16 are realised as a cascade of second-order
//! sections, plus one first-order section for odd orders. Coefficients are
//! designed with the bilinear transform (pre-warped cutoff) and kept in
//! `f64` so high orders near Nyquist stay stable.

use std::f64::consts::PI;

/// Highest supported filter order.
pub const MAX_FILTER_ORDER: u32 = 16;

/// Whether a per-channel filter is engaged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterState {
    /// Filter bypassed.
    #[default]
    Off,
    /// Filter processing the signal.
    On,
}

/// Filter response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// Attenuate below the cutoff.
    HighPass,
    /// Attenuate above the cutoff.
    LowPass,
}

/// Transposed direct form II section. First-order sections leave `b2`/`a2` at zero.
#[derive(Clone, Copy, Debug, Default)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Section {
    fn second_order(kind: FilterKind, k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        let a1 = 2.0 * (k2 - 1.0) * norm;
        let a2 = (1.0 - k / q + k2) * norm;
        let (b0, b1, b2) = match kind {
            FilterKind::LowPass => {
                let b0 = k2 * norm;
                (b0, 2.0 * b0, b0)
            }
            FilterKind::HighPass => (norm, -2.0 * norm, norm),
        };
        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            ..Self::default()
        }
    }

    fn first_order(kind: FilterKind, k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        let a1 = (k - 1.0) * norm;
        let (b0, b1) = match kind {
            FilterKind::LowPass => (k * norm, k * norm),
            FilterKind::HighPass => (norm, -norm),
        };
        Self {
            b0,
            b1,
            a1,
            ..Self::default()
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Single-channel Butterworth filter.
#[derive(Clone, Debug)]
pub struct ButterworthFilter {
    kind: FilterKind,
    order: u32,
    cutoff_hz: f64,
    sample_rate_hz: u32,
    sections: Vec<Section>,
}

impl ButterworthFilter {
    /// Create a filter; it passes audio unchanged until [`setup`](Self::setup) is called.
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            order: 0,
            cutoff_hz: 0.0,
            sample_rate_hz: 0,
            sections: Vec::new(),
        }
    }

    /// Design the filter for the given order, rate and cutoff, clearing its state.
    pub fn setup(&mut self, order: u32, sample_rate_hz: u32, cutoff_hz: f64) {
        debug_assert!((1..=MAX_FILTER_ORDER).contains(&order));
        debug_assert!(sample_rate_hz > 0);
        let order = order.clamp(1, MAX_FILTER_ORDER);
        let nyquist = f64::from(sample_rate_hz.max(1)) / 2.0;
        let cutoff_hz = cutoff_hz.clamp(f64::MIN_POSITIVE, nyquist * 0.9999);

        self.order = order;
        self.cutoff_hz = cutoff_hz;
        self.sample_rate_hz = sample_rate_hz;

        let k = (PI * cutoff_hz / f64::from(sample_rate_hz.max(1))).tan();
        let n = f64::from(order);

        self.sections.clear();
        for pair in 0..order / 2 {
            let theta = if order % 2 == 0 {
                (2.0 * f64::from(pair) + 1.0) * PI / (2.0 * n)
            } else {
                (f64::from(pair) + 1.0) * PI / n
            };
            let q = 1.0 / (2.0 * theta.cos());
            self.sections.push(Section::second_order(self.kind, k, q));
        }
        if order % 2 == 1 {
            self.sections.push(Section::first_order(self.kind, k));
        }
    }

    /// Filter order.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Designed cutoff frequency in Hz.
    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }

    /// Clear the delay state without changing the design.
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.z1 = 0.0;
            section.z2 = 0.0;
        }
    }

    /// Filter one sample.
    #[inline]
    pub fn filter(&mut self, sample: f32) -> f32 {
        let mut y = f64::from(sample);
        for section in &mut self.sections {
            y = section.process(y);
        }
        y as f32
    }
}

/// Left/right pair of identically designed filters.
#[derive(Clone, Debug)]
pub struct StereoFilter {
    channels: [ButterworthFilter; 2],
}

impl StereoFilter {
    /// Create an undesigned stereo pair.
    pub fn new(kind: FilterKind) -> Self {
        Self {
            channels: [ButterworthFilter::new(kind), ButterworthFilter::new(kind)],
        }
    }

    /// Design both sides.
    pub fn setup(&mut self, order: u32, sample_rate_hz: u32, cutoff_hz: f64) {
        for filter in &mut self.channels {
            filter.setup(order, sample_rate_hz, cutoff_hz);
        }
    }

    /// Filter a frame.
    #[inline]
    pub fn process(&mut self, frame: crate::frame::AudioFrame) -> crate::frame::AudioFrame {
        crate::frame::AudioFrame::new(
            self.channels[0].filter(frame.left),
            self.channels[1].filter(frame.right),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_gain(filter: &mut ButterworthFilter, freq: f64, rate: u32) -> f64 {
        let frames = rate as usize;
        let mut peak = 0.0f64;
        for n in 0..frames {
            let x = (2.0 * PI * freq * n as f64 / f64::from(rate)).sin() as f32;
            let y = filter.filter(x);
            if n > frames / 2 {
                peak = peak.max(f64::from(y.abs()));
            }
        }
        peak
    }

    #[test]
    fn lowpass_passes_band_and_rejects_stop() {
        for order in [1, 2, 3, 8, 16] {
            let mut lpf = ButterworthFilter::new(FilterKind::LowPass);
            lpf.setup(order, 48_000, 1_000.0);
            let pass = sine_gain(&mut lpf, 100.0, 48_000);
            lpf.reset();
            let stop = sine_gain(&mut lpf, 8_000.0, 48_000);
            assert!((pass - 1.0).abs() < 0.05, "order {order}: passband gain {pass}");
            assert!(stop < 0.2, "order {order}: stopband gain {stop}");
        }
    }

    #[test]
    fn highpass_cutoff_is_minus_three_db() {
        let mut hpf = ButterworthFilter::new(FilterKind::HighPass);
        hpf.setup(4, 48_000, 500.0);
        let gain = sine_gain(&mut hpf, 500.0, 48_000);
        assert!((gain - 0.7071).abs() < 0.03, "gain at cutoff {gain}");
    }

    #[test]
    fn cutoff_just_below_nyquist_stays_finite() {
        let mut lpf = ButterworthFilter::new(FilterKind::LowPass);
        lpf.setup(16, 48_000, 23_999.0);
        for n in 0..10_000 {
            let y = lpf.filter(if n % 2 == 0 { 32767.0 } else { -32768.0 });
            assert!(y.is_finite(), "sample {n} diverged");
        }
    }
}
