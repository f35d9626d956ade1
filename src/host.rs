//! Host audio sink contract.
//!
//! The mixer never talks to an audio API directly. An [`AudioHost`] opens a
//! device for a requested rate and block size, reports what it actually
//! negotiated, and pulls normalised frames through an [`OutputReader`] from
//! whatever thread its callback runs on.

use std::sync::Arc;

use crate::MixerError;
use crate::frame::AudioFrame;
use crate::queue::RwQueue;

/// Rate and block size asked of the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceRequest {
    /// Requested sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Requested frames per callback.
    pub blocksize: u32,
    /// Whether the host may pick different values.
    pub negotiate: bool,
}

/// Rate and block size the host actually opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Negotiated sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Negotiated frames per callback.
    pub blocksize: u32,
}

/// A host audio backend.
pub trait AudioHost: Send {
    /// Open the device; the host keeps `reader` and calls it from its pull callback.
    fn open(
        &mut self,
        request: &DeviceRequest,
        reader: OutputReader,
    ) -> Result<DeviceSpec, MixerError>;

    /// Close the device; the reader must not be used afterwards.
    fn close(&mut self);
}

/// Pull side of the final output queue.
#[derive(Clone)]
pub struct OutputReader {
    queue: Arc<RwQueue<AudioFrame>>,
    scratch: Vec<AudioFrame>,
}

impl OutputReader {
    pub(crate) fn new(queue: Arc<RwQueue<AudioFrame>>) -> Self {
        Self {
            queue,
            scratch: Vec::new(),
        }
    }

    /// Frames waiting to be pulled.
    pub fn available(&self) -> usize {
        self.queue.size()
    }

    /// Fill interleaved stereo samples, padding any shortfall with silence.
    ///
    /// Never blocks. Returns the number of frames taken from the queue.
    pub fn fill_interleaved(&mut self, out: &mut [f32]) -> usize {
        let frames = out.len() / 2;
        self.scratch.resize(frames, AudioFrame::ZERO);
        let got = self.queue.nonblocking_bulk_dequeue(&mut self.scratch[..frames]);
        for (n, chunk) in out.chunks_exact_mut(2).enumerate() {
            let frame = if n < got { self.scratch[n] } else { AudioFrame::ZERO };
            frame.write_interleaved(chunk);
        }
        got
    }

    /// Fill whole frames, padding any shortfall with silence.
    pub fn fill_frames(&mut self, out: &mut [AudioFrame]) -> usize {
        let got = self.queue.nonblocking_bulk_dequeue(out);
        out[got..].fill(AudioFrame::ZERO);
        got
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortfall_is_padded_with_silence() {
        let queue = Arc::new(RwQueue::new(8));
        queue.bulk_enqueue(&[AudioFrame::new(0.25, -0.25)]);
        let mut reader = OutputReader::new(Arc::clone(&queue));
        let mut out = [1.0f32; 6];
        assert_eq!(reader.fill_interleaved(&mut out), 1);
        assert_eq!(out, [0.25, -0.25, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(reader.fill_interleaved(&mut out), 0);
        assert_eq!(out, [0.0; 6]);
    }
}
