use dasp_signal::{ConstHz, Signal, Sine};

use crate::frame::AudioFrame;

/// Chorus voice settings (delay ms, depth ms, LFO Hz).
const VOICES: [(f32, f32, f64); 2] = [(7.0, 2.0, 0.5), (12.0, 3.0, 0.83)];

/// Longest delay any voice can reach, in milliseconds.
const MAX_DELAY_MS: f32 = 16.0;

struct Voice {
    delay_ms: f32,
    depth_ms: f32,
    lfo_hz: f64,
    lfo: Sine<ConstHz>,
    enabled: bool,
}

impl Voice {
    fn new((delay_ms, depth_ms, lfo_hz): (f32, f32, f64), sample_rate_hz: u32) -> Self {
        Self {
            delay_ms,
            depth_ms,
            lfo_hz,
            lfo: dasp_signal::rate(f64::from(sample_rate_hz)).const_hz(lfo_hz).sine(),
            enabled: false,
        }
    }
}

/// Stereo chorus returning only the wet signal.
///
/// Each voice reads a delay line at an LFO-modulated offset; the right side
/// uses the inverted LFO so the two sides drift apart.
pub struct Chorus {
    sample_rate_hz: u32,
    voices: Vec<Voice>,
    delay: [Vec<f32>; 2],
    pos: usize,
}

impl Default for Chorus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Chorus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chorus")
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field(
                "enabled",
                &self.voices.iter().map(|v| v.enabled).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Chorus {
    /// Chorus at 48 kHz with the first voice enabled.
    pub fn new() -> Self {
        let mut chorus = Self {
            sample_rate_hz: 48_000,
            voices: Vec::new(),
            delay: [Vec::new(), Vec::new()],
            pos: 0,
        };
        chorus.set_sample_rate(48_000);
        chorus.set_enables_chorus(true, false);
        chorus
    }

    /// Change the processing rate, clearing delay state.
    pub fn set_sample_rate(&mut self, sample_rate_hz: u32) {
        let sample_rate_hz = sample_rate_hz.max(1);
        let enabled: Vec<bool> = self.voices.iter().map(|v| v.enabled).collect();
        self.sample_rate_hz = sample_rate_hz;
        self.voices = VOICES
            .iter()
            .enumerate()
            .map(|(i, &settings)| {
                let mut voice = Voice::new(settings, sample_rate_hz);
                voice.enabled = enabled.get(i).copied().unwrap_or(false);
                voice
            })
            .collect();
        let len = (MAX_DELAY_MS * 0.001 * sample_rate_hz as f32) as usize + 2;
        self.delay = [vec![0.0; len], vec![0.0; len]];
        self.pos = 0;
    }

    /// Turn the two chorus voices on or off.
    pub fn set_enables_chorus(&mut self, first: bool, second: bool) {
        for (voice, enabled) in self.voices.iter_mut().zip([first, second]) {
            voice.enabled = enabled;
        }
    }

    /// LFO rates of the enabled voices.
    pub fn active_lfo_rates(&self) -> Vec<f64> {
        self.voices
            .iter()
            .filter(|v| v.enabled)
            .map(|v| v.lfo_hz)
            .collect()
    }

    fn read(&self, side: usize, delay_frames: f32) -> f32 {
        let buffer = &self.delay[side];
        let len = buffer.len();
        let delay_frames = delay_frames.clamp(1.0, (len - 2) as f32);
        let whole = delay_frames.floor();
        let frac = delay_frames - whole;
        let a = buffer[(self.pos + len - whole as usize) % len];
        let b = buffer[(self.pos + len - whole as usize - 1) % len];
        a + (b - a) * frac
    }

    /// Process one frame.
    pub fn process(&mut self, frame: AudioFrame) -> AudioFrame {
        let len = self.delay[0].len();
        self.delay[0][self.pos] = frame.left;
        self.delay[1][self.pos] = frame.right;

        let frames_per_ms = self.sample_rate_hz as f32 * 0.001;
        let mut out = AudioFrame::ZERO;
        let mut active = 0;
        for i in 0..self.voices.len() {
            let lfo = self.voices[i].lfo.next() as f32;
            if !self.voices[i].enabled {
                continue;
            }
            let voice = &self.voices[i];
            let left_delay = (voice.delay_ms + voice.depth_ms * lfo) * frames_per_ms;
            let right_delay = (voice.delay_ms - voice.depth_ms * lfo) * frames_per_ms;
            out.left += self.read(0, left_delay);
            out.right += self.read(1, right_delay);
            active += 1;
        }
        self.pos = (self.pos + 1) % len;

        if active > 1 {
            out * (1.0 / active as f32)
        } else {
            out
        }
    }
}
