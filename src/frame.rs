//! Canonical stereo frame and line mapping types.
//!
//! All channel and master-bus math runs on [`AudioFrame`] values in the
//! 16-bit-equivalent amplitude domain (roughly ±32768). Normalisation to the
//! host's ±1.0 range happens once, at the very end of a mix iteration.

use std::ops::{Add, AddAssign, Index, IndexMut, Mul, MulAssign};

use dasp_frame::{Frame, Stereo};

/// Largest positive 16-bit sample value, used as the 0 dBFS reference.
pub const MAX_16BIT_SAMPLE_VALUE: f32 = 32767.0;

/// A pair of left/right samples in the canonical amplitude domain.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AudioFrame {
    /// Left sample.
    pub left: f32,
    /// Right sample.
    pub right: f32,
}

impl AudioFrame {
    /// Silent frame.
    pub const ZERO: AudioFrame = AudioFrame {
        left: 0.0,
        right: 0.0,
    };

    /// Build a frame from explicit left and right samples.
    pub const fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Build a frame carrying the same sample on both sides.
    pub const fn splat(sample: f32) -> Self {
        Self {
            left: sample,
            right: sample,
        }
    }

    /// True when both samples are exactly zero.
    pub fn is_silent(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }

    /// Largest absolute sample of the two sides.
    pub fn peak(&self) -> f32 {
        self.left.abs().max(self.right.abs())
    }

    /// Interleave into a two-element slice.
    pub fn write_interleaved(&self, out: &mut [f32]) {
        out[0] = self.left;
        out[1] = self.right;
    }
}

impl From<Stereo<f32>> for AudioFrame {
    fn from(frame: Stereo<f32>) -> Self {
        Self::new(frame[0], frame[1])
    }
}

impl From<AudioFrame> for Stereo<f32> {
    fn from(frame: AudioFrame) -> Self {
        [frame.left, frame.right]
    }
}

impl Add for AudioFrame {
    type Output = AudioFrame;

    fn add(self, rhs: AudioFrame) -> AudioFrame {
        Stereo::<f32>::from(self).add_amp::<Stereo<f32>>(rhs.into()).into()
    }
}

impl AddAssign for AudioFrame {
    fn add_assign(&mut self, rhs: AudioFrame) {
        *self = *self + rhs;
    }
}

impl Mul<f32> for AudioFrame {
    type Output = AudioFrame;

    fn mul(self, gain: f32) -> AudioFrame {
        Stereo::<f32>::from(self).scale_amp(gain).into()
    }
}

impl Mul for AudioFrame {
    type Output = AudioFrame;

    fn mul(self, gain: AudioFrame) -> AudioFrame {
        Stereo::<f32>::from(self).mul_amp::<Stereo<f32>>(gain.into()).into()
    }
}

impl MulAssign<f32> for AudioFrame {
    fn mul_assign(&mut self, gain: f32) {
        *self = *self * gain;
    }
}

impl MulAssign for AudioFrame {
    fn mul_assign(&mut self, gain: AudioFrame) {
        *self = *self * gain;
    }
}

impl Index<Line> for AudioFrame {
    type Output = f32;

    fn index(&self, line: Line) -> &f32 {
        match line {
            Line::Left => &self.left,
            Line::Right => &self.right,
        }
    }
}

impl IndexMut<Line> for AudioFrame {
    fn index_mut(&mut self, line: Line) -> &mut f32 {
        match line {
            Line::Left => &mut self.left,
            Line::Right => &mut self.right,
        }
    }
}

/// A logical output line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Line {
    /// Left line.
    Left,
    /// Right line.
    Right,
}

/// Mapping of a stereo signal's two components onto output lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StereoLine {
    /// Line receiving the left component.
    pub left: Line,
    /// Line receiving the right component.
    pub right: Line,
}

/// Straight left-to-left, right-to-right mapping.
pub const STEREO_MAP: StereoLine = StereoLine {
    left: Line::Left,
    right: Line::Right,
};

/// Swapped mapping.
pub const REVERSE_MAP: StereoLine = StereoLine {
    left: Line::Right,
    right: Line::Left,
};

impl Default for StereoLine {
    fn default() -> Self {
        STEREO_MAP
    }
}

/// Per-channel capability flags declared when the channel is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelFeature {
    /// Channel produces a genuine stereo signal.
    Stereo,
    /// Channel carries digital audio (DAC, PCM playback).
    DigitalAudio,
    /// Channel carries synthesizer output.
    Synthesizer,
    /// Channel may be put to sleep on inactivity.
    Sleep,
    /// Channel may be fed through a noise gate.
    NoiseGate,
    /// Channel may send into the master reverb.
    ReverbSend,
    /// Channel may send into the master chorus.
    ChorusSend,
    /// Channel may fade out before sleeping.
    FadeOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_arithmetic_is_elementwise() {
        let a = AudioFrame::new(1.0, -2.0);
        let b = AudioFrame::new(0.5, 4.0);
        assert_eq!(a + b, AudioFrame::new(1.5, 2.0));
        assert_eq!(a * 2.0, AudioFrame::new(2.0, -4.0));
        assert_eq!(a * b, AudioFrame::new(0.5, -8.0));

        let mut c = a;
        c += b;
        c *= 0.5;
        assert_eq!(c, AudioFrame::new(0.75, 1.0));
    }

    #[test]
    fn line_indexing_follows_maps() {
        let mut out = AudioFrame::ZERO;
        let src = AudioFrame::new(3.0, 7.0);
        out[REVERSE_MAP.left] += src.left;
        out[REVERSE_MAP.right] += src.right;
        assert_eq!(out, AudioFrame::new(7.0, 3.0));
    }
}
