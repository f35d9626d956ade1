//! Start-up amplitude envelope.
//!
//! Freshly started devices often emit a large DC step or a loud first
//! transient. The envelope clamps samples to an "edge" that starts closed and
//! widens every time the signal pushes against it, reaching full scale within
//! the expansion window. After the expiry period it turns itself off.

use crate::frame::AudioFrame;

/// Milliseconds for a constantly loud signal to open the envelope fully.
pub const EXPANSION_WINDOW_MS: u32 = 15;

/// Seconds after which the envelope stops inspecting the signal.
pub const EXPIRES_AFTER_SECONDS: u32 = 10;

/// Click-avoiding amplitude envelope.
#[derive(Clone, Debug)]
pub struct Envelope {
    edge: f32,
    edge_limit: f32,
    edge_increment: f32,
    frames_done: u64,
    expire_after_frames: u64,
    active: bool,
}

impl Envelope {
    /// Construct an envelope for the given rate and peak amplitude.
    pub fn new(frame_rate_hz: u32, peak_amplitude: f32) -> Self {
        let mut envelope = Self {
            edge: 0.0,
            edge_limit: 0.0,
            edge_increment: 0.0,
            frames_done: 0,
            expire_after_frames: 0,
            active: false,
        };
        envelope.update(frame_rate_hz, peak_amplitude);
        envelope
    }

    /// Re-derive the envelope for a new rate or peak and re-arm it.
    pub fn update(&mut self, frame_rate_hz: u32, peak_amplitude: f32) {
        let frame_rate_hz = frame_rate_hz.max(1);
        self.expire_after_frames = u64::from(EXPIRES_AFTER_SECONDS) * u64::from(frame_rate_hz);
        self.edge_limit = peak_amplitude.max(0.0);

        let window_frames =
            (u64::from(EXPANSION_WINDOW_MS) * u64::from(frame_rate_hz) / 1000).max(1);
        self.edge_increment = (self.edge_limit / window_frames as f32).ceil().max(1.0);

        self.reactivate();
    }

    /// Close the edge and start monitoring again.
    pub fn reactivate(&mut self) {
        self.edge = 0.0;
        self.frames_done = 0;
        self.active = self.edge_limit > 0.0;
    }

    /// Whether the envelope still shapes the signal.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Clamp the frame to the current edge, widening it on contact.
    pub fn process(&mut self, frame: &mut AudioFrame) {
        if !self.active {
            return;
        }

        let edge = self.edge;
        let mut touched = false;
        for sample in [&mut frame.left, &mut frame.right] {
            if sample.abs() > edge {
                *sample = sample.clamp(-edge, edge);
                touched = true;
            }
        }
        if touched {
            self.edge = (self.edge + self.edge_increment).min(self.edge_limit);
        }

        self.frames_done += 1;
        if self.edge >= self.edge_limit || self.frames_done > self.expire_after_frames {
            self.active = false;
        }
    }
}
