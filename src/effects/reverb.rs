//! Stereo room reverb.
//!
//! Freeverb-style network: a band-limited, pre-delayed mono input feeds
//! parallel damped comb filters per side, then a chain of all-pass
//! diffusers. A few taps off the pre-delay line provide early reflections.
//! The output is always fully wet at unity gain; the mixer controls the
//! amount through per-channel send levels.

use crate::frame::AudioFrame;

/// Comb delay lengths in frames at 44.1 kHz.
const COMB_LENGTHS: [usize; 8] = [1557, 1617, 1491, 1422, 1277, 1356, 1188, 1116];

/// All-pass delay lengths in frames at 44.1 kHz.
const ALLPASS_LENGTHS: [usize; 4] = [225, 556, 441, 341];

/// Early reflection taps (ms, left gain, right gain).
const EARLY_TAPS: [(f32, f32, f32); 4] = [
    (4.3, 0.84, 0.52),
    (10.7, 0.47, 0.77),
    (17.9, 0.58, 0.31),
    (26.3, 0.22, 0.41),
];

const STEREO_SPREAD: usize = 23;
const MAX_PREDELAY_MS: f32 = 100.0;
const COMB_GAIN: f32 = 0.015;
const REFERENCE_RATE_HZ: f32 = 44_100.0;

/// Reverb character, every field in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReverbParams {
    /// Delay before the reverb onset.
    pub predelay: f32,
    /// Level of early reflections added to the tail.
    pub early_mix: f32,
    /// Room size; scales the comb lengths.
    pub size: f32,
    /// Diffusion density; sets the all-pass feedback.
    pub density: f32,
    /// Input bandwidth; lower values darken the input.
    pub bandwidth: f32,
    /// Tail length; sets the comb feedback.
    pub decay: f32,
    /// High-frequency absorption inside the tail.
    pub damping: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            predelay: 0.0,
            early_mix: 0.75,
            size: 0.5,
            density: 0.5,
            bandwidth: 0.95,
            decay: 0.42,
            damping: 0.21,
        }
    }
}

#[derive(Clone, Debug)]
struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    filter_state: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_state = output * (1.0 - damp) + self.filter_state * damp;
        self.buffer[self.pos] = input + self.filter_state * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

#[derive(Clone, Debug)]
struct Allpass {
    buffer: Vec<f32>,
    pos: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        self.buffer[self.pos] = input + buffered * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        buffered - input
    }
}

/// Master-bus reverb processor.
#[derive(Clone, Debug)]
pub struct Reverb {
    params: ReverbParams,
    sample_rate_hz: u32,
    predelay: Vec<f32>,
    predelay_pos: usize,
    predelay_frames: usize,
    early_taps: Vec<(usize, f32, f32)>,
    bandwidth_state: f32,
    combs: [Vec<Comb>; 2],
    allpasses: [Vec<Allpass>; 2],
}

impl Default for Reverb {
    fn default() -> Self {
        Self::new()
    }
}

impl Reverb {
    /// Reverb at 48 kHz with default parameters.
    pub fn new() -> Self {
        let mut reverb = Self {
            params: ReverbParams::default(),
            sample_rate_hz: 48_000,
            predelay: Vec::new(),
            predelay_pos: 0,
            predelay_frames: 0,
            early_taps: Vec::new(),
            bandwidth_state: 0.0,
            combs: [Vec::new(), Vec::new()],
            allpasses: [Vec::new(), Vec::new()],
        };
        reverb.rebuild();
        reverb
    }

    /// Active parameters.
    pub fn params(&self) -> ReverbParams {
        self.params
    }

    /// Change the processing rate, clearing the tail.
    pub fn set_sample_rate(&mut self, sample_rate_hz: u32) {
        self.sample_rate_hz = sample_rate_hz.max(1);
        self.rebuild();
    }

    /// Apply new parameters, clearing the tail.
    pub fn setup(&mut self, params: ReverbParams) {
        self.params = params;
        self.rebuild();
    }

    fn frames_for_ms(&self, ms: f32) -> usize {
        (ms * 0.001 * self.sample_rate_hz as f32) as usize
    }

    fn rebuild(&mut self) {
        let rate_scale = self.sample_rate_hz as f32 / REFERENCE_RATE_HZ;
        let size_scale = 0.4 + 0.6 * self.params.size.clamp(0.0, 1.0);
        let scaled = |len: usize, spread: usize| {
            (((len + spread) as f32) * rate_scale * size_scale) as usize
        };

        for (side, spread) in [(0, 0), (1, STEREO_SPREAD)] {
            self.combs[side] = COMB_LENGTHS
                .iter()
                .map(|&len| Comb::new(scaled(len, spread)))
                .collect();
            self.allpasses[side] = ALLPASS_LENGTHS
                .iter()
                .map(|&len| Allpass::new((((len + spread) as f32) * rate_scale) as usize))
                .collect();
        }

        self.predelay_frames =
            self.frames_for_ms(self.params.predelay.clamp(0.0, 1.0) * MAX_PREDELAY_MS);
        self.early_taps = EARLY_TAPS
            .iter()
            .map(|&(ms, l, r)| (self.frames_for_ms(ms), l, r))
            .collect();
        let longest_tap = self.early_taps.iter().map(|t| t.0).max().unwrap_or(0);
        self.predelay = vec![0.0; self.predelay_frames.max(longest_tap) + 1];
        self.predelay_pos = 0;
        self.bandwidth_state = 0.0;
    }

    fn delayed(&self, frames: usize) -> f32 {
        let len = self.predelay.len();
        self.predelay[(self.predelay_pos + len - frames.min(len - 1)) % len]
    }

    /// Process one frame, returning only the wet signal.
    pub fn process(&mut self, frame: AudioFrame) -> AudioFrame {
        let p = self.params;
        let input = (frame.left + frame.right) * 0.5;

        let bandwidth = p.bandwidth.clamp(0.0, 1.0);
        self.bandwidth_state = bandwidth * input + (1.0 - bandwidth) * self.bandwidth_state;

        self.predelay[self.predelay_pos] = self.bandwidth_state;
        let late_in = self.delayed(self.predelay_frames);

        let mut early = AudioFrame::ZERO;
        for &(frames, l, r) in &self.early_taps {
            let tap = self.delayed(frames);
            early.left += tap * l;
            early.right += tap * r;
        }
        self.predelay_pos = (self.predelay_pos + 1) % self.predelay.len();

        let feedback = 0.7 + 0.28 * p.decay.clamp(0.0, 1.0);
        let damp = p.damping.clamp(0.0, 1.0) * 0.4;
        let diffusion = 0.3 + 0.4 * p.density.clamp(0.0, 1.0);

        let mut late = [0.0f32; 2];
        for (side, out) in late.iter_mut().enumerate() {
            let mut acc = 0.0;
            for comb in &mut self.combs[side] {
                acc += comb.process(late_in * COMB_GAIN, feedback, damp);
            }
            for allpass in &mut self.allpasses[side] {
                acc = allpass.process(acc, diffusion);
            }
            *out = acc;
        }

        let early_gain = p.early_mix.clamp(0.0, 1.0) * 0.25;
        AudioFrame::new(
            late[0] + early.left * early_gain,
            late[1] + early.right * early_gain,
        )
    }
}
