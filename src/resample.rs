//! Per-channel sample-rate adaptation.
//!
//! A channel reaches the mixer rate through one of three strategies chosen by
//! [`ResampleMethod`]: linear-interpolation upsampling, zero-order-hold
//! upsampling optionally followed by the sinc resampler, or the sinc
//! resampler alone. [`RateAdapter::configure`] decides which of the paths are
//! active; zero-order hold runs during sample conversion (it repeats source
//! frames), the other paths run in [`RateAdapter::process`].

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, warn};

use crate::MixerError;
use crate::frame::AudioFrame;

/// Largest block handed to the sinc resampler in one call.
const MAX_CHUNK_FRAMES: usize = 1024;

/// Ratio headroom before the sinc resampler has to be rebuilt.
const MAX_RELATIVE_RATIO: f64 = 8.0;

/// How a channel is brought to the mixer rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResampleMethod {
    /// Linear interpolation when upsampling, sinc resampling when downsampling.
    #[default]
    LerpUpsampleOrResample,
    /// Zero-order hold up to a target rate, then sinc resampling to the mixer rate.
    ZeroOrderHoldAndResample,
    /// Sinc resampling whenever the rates differ.
    Resample,
}

/// Which conversion stages are active for a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RatePath {
    /// Linear-interpolation upsampler.
    pub lerp_upsample: bool,
    /// Zero-order-hold upsampler.
    pub zoh_upsample: bool,
    /// Sinc resampler.
    pub resample: bool,
}

impl RatePath {
    /// Short label for status displays.
    pub fn describe(&self) -> &'static str {
        match (self.lerp_upsample, self.zoh_upsample, self.resample) {
            (true, _, _) => "lerp",
            (false, true, true) => "zoh+sinc",
            (false, true, false) => "zoh",
            (false, false, true) => "sinc",
            (false, false, false) => "none",
        }
    }
}

/// Owned sinc resampler with stereo scratch buffers.
///
/// Dropping the wrapper releases the resampler; `reset` clears its history
/// and re-arms the leading-delay skip so the next block starts with no
/// latency.
pub struct LibResampler {
    inner: SincFixedIn<f32>,
    in_rate_hz: u32,
    out_rate_hz: u32,
    skip_frames: usize,
    input: [Vec<f32>; 2],
    output: Vec<Vec<f32>>,
}

impl LibResampler {
    /// Build a resampler converting `in_rate_hz` to `out_rate_hz`.
    pub fn new(in_rate_hz: u32, out_rate_hz: u32) -> Result<Self, MixerError> {
        let inner = Self::build(in_rate_hz, out_rate_hz)?;
        let output = vec![vec![0.0; inner.output_frames_max()]; 2];
        let mut resampler = Self {
            inner,
            in_rate_hz,
            out_rate_hz,
            skip_frames: 0,
            input: [
                Vec::with_capacity(MAX_CHUNK_FRAMES),
                Vec::with_capacity(MAX_CHUNK_FRAMES),
            ],
            output,
        };
        resampler.reset();
        Ok(resampler)
    }

    fn build(in_rate_hz: u32, out_rate_hz: u32) -> Result<SincFixedIn<f32>, MixerError> {
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        SincFixedIn::<f32>::new(
            ratio(in_rate_hz, out_rate_hz),
            MAX_RELATIVE_RATIO,
            params,
            MAX_CHUNK_FRAMES,
            2,
        )
        .map_err(|err| MixerError::Resampler(err.to_string()))
    }

    /// Input and output rates in Hz.
    pub fn rates(&self) -> (u32, u32) {
        (self.in_rate_hz, self.out_rate_hz)
    }

    /// Retarget the resampler, rebuilding it only when the new ratio is out of range.
    pub fn set_rates(&mut self, in_rate_hz: u32, out_rate_hz: u32) -> Result<(), MixerError> {
        if (in_rate_hz, out_rate_hz) == (self.in_rate_hz, self.out_rate_hz) {
            return Ok(());
        }
        if self
            .inner
            .set_resample_ratio(ratio(in_rate_hz, out_rate_hz), false)
            .is_err()
        {
            self.inner = Self::build(in_rate_hz, out_rate_hz)?;
            for side in &mut self.output {
                side.resize(self.inner.output_frames_max(), 0.0);
            }
        }
        self.in_rate_hz = in_rate_hz;
        self.out_rate_hz = out_rate_hz;
        self.reset();
        Ok(())
    }

    /// Clear filter history and skip the leading delay on the next output.
    ///
    /// The inner reset falls back to the construction ratio, so the current
    /// rates are applied again afterwards.
    pub fn reset(&mut self) {
        self.inner.reset();
        let target = ratio(self.in_rate_hz, self.out_rate_hz);
        if let Err(err) = self.inner.set_resample_ratio(target, false) {
            warn!(
                "Sinc resampler kept its previous ratio for {} Hz to {} Hz: {err}",
                self.in_rate_hz, self.out_rate_hz
            );
        }
        self.skip_frames = self.inner.output_delay();
    }

    /// Frames expected for `in_frames` of input, rounded up plus one.
    pub fn estimate_out_frames(&self, in_frames: usize) -> usize {
        let num = in_frames as u64 * u64::from(self.out_rate_hz);
        num.div_ceil(u64::from(self.in_rate_hz.max(1))) as usize + 1
    }

    /// Resample `input`, appending the produced frames to `out`.
    ///
    /// The output is pre-sized to the estimate plus the resampler delay and
    /// shrunk to the frames actually produced.
    pub fn process(
        &mut self,
        input: &[AudioFrame],
        out: &mut Vec<AudioFrame>,
    ) -> Result<usize, MixerError> {
        let start = out.len();
        let capacity = self.estimate_out_frames(input.len()) + self.inner.output_delay();
        out.resize(start + capacity, AudioFrame::ZERO);
        let mut written = 0usize;

        for chunk in input.chunks(MAX_CHUNK_FRAMES) {
            self.inner
                .set_chunk_size(chunk.len())
                .map_err(|err| MixerError::Resampler(err.to_string()))?;

            let [left, right] = &mut self.input;
            left.clear();
            right.clear();
            for frame in chunk {
                left.push(frame.left);
                right.push(frame.right);
            }

            let (_, generated) = self
                .inner
                .process_into_buffer(&self.input[..], &mut self.output[..], None)
                .map_err(|err| MixerError::Resampler(err.to_string()))?;

            let skip = self.skip_frames.min(generated);
            self.skip_frames -= skip;

            let fresh = generated - skip;
            debug_assert!(written + fresh <= capacity, "resampler overran its estimate");
            let fresh = fresh.min(capacity - written);
            for (n, slot) in (skip..skip + fresh).zip(&mut out[start + written..]) {
                *slot = AudioFrame::new(self.output[0][n], self.output[1][n]);
            }
            written += fresh;
        }

        out.truncate(start + written);
        Ok(written)
    }
}

fn ratio(in_rate_hz: u32, out_rate_hz: u32) -> f64 {
    f64::from(out_rate_hz) / f64::from(in_rate_hz.max(1))
}

#[derive(Clone, Copy, Debug, Default)]
struct LerpState {
    pos: f32,
    step: f32,
    last_frame: AudioFrame,
}

#[derive(Clone, Copy, Debug, Default)]
struct ZohState {
    pos: f32,
    step: f32,
}

/// Rate-conversion state machine for one channel.
pub struct RateAdapter {
    method: ResampleMethod,
    zoh_target_rate_hz: u32,
    channel_rate_hz: u32,
    mixer_rate_hz: u32,
    path: RatePath,
    lerp: LerpState,
    zoh: ZohState,
    resampler: Option<LibResampler>,
}

impl Default for RateAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateAdapter {
    /// Pass-through adapter using the default method.
    pub fn new() -> Self {
        Self {
            method: ResampleMethod::default(),
            zoh_target_rate_hz: 0,
            channel_rate_hz: 0,
            mixer_rate_hz: 0,
            path: RatePath::default(),
            lerp: LerpState::default(),
            zoh: ZohState::default(),
            resampler: None,
        }
    }

    /// Selected strategy.
    pub fn method(&self) -> ResampleMethod {
        self.method
    }

    /// Select a strategy; takes effect on the next [`configure`](Self::configure).
    pub fn set_method(&mut self, method: ResampleMethod) {
        self.method = method;
    }

    /// Zero-order-hold target rate (0 until set).
    pub fn zoh_target_rate(&self) -> u32 {
        self.zoh_target_rate_hz
    }

    /// Set the zero-order-hold target rate; takes effect on the next configure.
    pub fn set_zoh_target_rate(&mut self, rate_hz: u32) {
        self.zoh_target_rate_hz = rate_hz;
    }

    /// Currently active stages.
    pub fn rate_path(&self) -> RatePath {
        self.path
    }

    /// True once the sinc resampler has been built.
    pub fn has_resampler(&self) -> bool {
        self.resampler.is_some()
    }

    /// Choose the active stages for the given rates.
    ///
    /// The sinc resampler is built on first need and retargeted afterwards.
    pub fn configure(
        &mut self,
        name: &str,
        channel_rate_hz: u32,
        mixer_rate_hz: u32,
    ) -> Result<(), MixerError> {
        self.channel_rate_hz = channel_rate_hz;
        self.mixer_rate_hz = mixer_rate_hz;
        self.path = RatePath::default();

        let resample_from = match self.method {
            ResampleMethod::LerpUpsampleOrResample => {
                if channel_rate_hz < mixer_rate_hz {
                    self.path.lerp_upsample = true;
                    self.init_lerp();
                    None
                } else if channel_rate_hz > mixer_rate_hz {
                    Some(channel_rate_hz)
                } else {
                    None
                }
            }
            ResampleMethod::ZeroOrderHoldAndResample => {
                if channel_rate_hz < self.zoh_target_rate_hz {
                    self.path.zoh_upsample = true;
                    self.init_zoh();
                    (self.zoh_target_rate_hz != mixer_rate_hz).then_some(self.zoh_target_rate_hz)
                } else if channel_rate_hz != mixer_rate_hz {
                    Some(channel_rate_hz)
                } else {
                    None
                }
            }
            ResampleMethod::Resample => {
                (channel_rate_hz != mixer_rate_hz).then_some(channel_rate_hz)
            }
        };

        if let Some(in_rate_hz) = resample_from {
            self.path.resample = true;
            match self.resampler.as_mut() {
                Some(resampler) => resampler.set_rates(in_rate_hz, mixer_rate_hz)?,
                None => self.resampler = Some(LibResampler::new(in_rate_hz, mixer_rate_hz)?),
            }
            debug!(
                "{name}: Sinc resampler is on, input rate: {in_rate_hz} Hz, output rate: {mixer_rate_hz} Hz"
            );
        }
        Ok(())
    }

    fn init_lerp(&mut self) {
        debug_assert!(self.channel_rate_hz < self.mixer_rate_hz);
        self.lerp = LerpState {
            pos: 0.0,
            step: self.channel_rate_hz as f32 / self.mixer_rate_hz.max(1) as f32,
            last_frame: AudioFrame::ZERO,
        };
    }

    fn init_zoh(&mut self) {
        debug_assert!(self.channel_rate_hz < self.zoh_target_rate_hz);
        self.zoh = ZohState {
            pos: 0.0,
            step: self.channel_rate_hz as f32 / self.zoh_target_rate_hz.max(1) as f32,
        };
    }

    /// Reset interpolation state and prime the sinc resampler for zero latency.
    pub fn clear(&mut self) {
        if self.path.lerp_upsample {
            self.init_lerp();
        }
        if self.path.zoh_upsample {
            self.init_zoh();
        }
        if self.path.resample {
            if let Some(resampler) = self.resampler.as_mut() {
                resampler.reset();
            }
        }
    }

    /// Advance the zero-order-hold accumulator by one output frame.
    ///
    /// Returns true when the next source frame should be consumed. Without
    /// zero-order hold every call consumes a source frame.
    #[inline]
    pub fn zoh_advance(&mut self) -> bool {
        if !self.path.zoh_upsample {
            return true;
        }
        self.zoh.pos += self.zoh.step;
        if self.zoh.pos > 1.0 {
            self.zoh.pos -= 1.0;
            true
        } else {
            false
        }
    }

    /// Bring converted frames to the mixer rate, appending to `out`.
    pub fn process(&mut self, name: &str, input: &[AudioFrame], out: &mut Vec<AudioFrame>) {
        debug_assert!(!(self.path.lerp_upsample && self.path.resample));

        if self.path.lerp_upsample {
            let s = &mut self.lerp;
            let mut i = 0;
            while i < input.len() {
                let curr = input[i];
                out.push(AudioFrame::new(
                    lerp(s.last_frame.left, curr.left, s.pos),
                    lerp(s.last_frame.right, curr.right, s.pos),
                ));
                s.pos += s.step;
                if s.pos > 1.0 {
                    s.pos -= 1.0;
                    s.last_frame = curr;
                    i += 1;
                }
            }
        } else if self.path.resample {
            match self.resampler.as_mut() {
                Some(resampler) => {
                    if let Err(err) = resampler.process(input, out) {
                        warn!("{name}: Resampling failed, dropping block: {err}");
                    }
                }
                None => out.extend_from_slice(input),
            }
        } else {
            out.extend_from_slice(input);
        }
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_for(method: ResampleMethod, zoh: u32, channel: u32, mixer: u32) -> RatePath {
        let mut adapter = RateAdapter::new();
        adapter.set_method(method);
        adapter.set_zoh_target_rate(zoh);
        adapter.configure("TEST", channel, mixer).expect("configure");
        adapter.rate_path()
    }

    #[test]
    fn path_matrix_matches_rate_relationships() {
        use ResampleMethod::*;
        let lerp = path_for(LerpUpsampleOrResample, 0, 22_050, 48_000);
        assert!(lerp.lerp_upsample && !lerp.resample && !lerp.zoh_upsample);

        let down = path_for(LerpUpsampleOrResample, 0, 49_716, 48_000);
        assert!(!down.lerp_upsample && down.resample);

        assert_eq!(path_for(LerpUpsampleOrResample, 0, 48_000, 48_000), RatePath::default());

        let zoh_only = path_for(ZeroOrderHoldAndResample, 48_000, 22_050, 48_000);
        assert!(zoh_only.zoh_upsample && !zoh_only.resample);

        let zoh_sinc = path_for(ZeroOrderHoldAndResample, 44_100, 22_050, 48_000);
        assert!(zoh_sinc.zoh_upsample && zoh_sinc.resample && !zoh_sinc.lerp_upsample);

        let no_zoh = path_for(ZeroOrderHoldAndResample, 22_050, 32_000, 48_000);
        assert!(!no_zoh.zoh_upsample && no_zoh.resample);

        let sinc = path_for(Resample, 0, 22_050, 48_000);
        assert!(sinc.resample && !sinc.lerp_upsample);
        assert_eq!(path_for(Resample, 0, 48_000, 48_000), RatePath::default());
    }

    #[test]
    fn lerp_upsampling_doubles_frame_count() {
        let mut adapter = RateAdapter::new();
        adapter.configure("TEST", 24_000, 48_000).expect("configure");
        let input: Vec<AudioFrame> = (0..100).map(|n| AudioFrame::splat(n as f32)).collect();
        let mut out = Vec::new();
        adapter.process("TEST", &input, &mut out);
        assert!((199..=201).contains(&out.len()), "produced {} frames", out.len());
        assert_eq!(out[0], AudioFrame::ZERO);
        assert_eq!(out[3].left, 0.5, "halfway between the first two source frames");
    }

    #[test]
    fn zoh_repeats_source_frames() {
        let mut adapter = RateAdapter::new();
        adapter.set_method(ResampleMethod::ZeroOrderHoldAndResample);
        adapter.set_zoh_target_rate(48_000);
        adapter.configure("TEST", 12_000, 48_000).expect("configure");
        let advances: Vec<bool> = (0..8).map(|_| adapter.zoh_advance()).collect();
        assert_eq!(advances.iter().filter(|&&a| a).count(), 1, "{advances:?}");
    }

    #[test]
    fn sinc_resampler_output_tracks_ratio() {
        let mut resampler = LibResampler::new(22_050, 48_000).expect("resampler");
        let input = vec![AudioFrame::splat(1000.0); 4410];
        let mut out = Vec::new();
        let produced = resampler.process(&input, &mut out).expect("process");
        assert_eq!(produced, out.len());
        assert!(produced <= resampler.estimate_out_frames(input.len()));
        assert!(produced > 8_000, "produced {produced} frames");
    }

    fn frames_for_one_second(resampler: &mut LibResampler, in_rate_hz: u32) -> usize {
        let input = vec![AudioFrame::splat(1000.0); in_rate_hz as usize];
        let mut out = Vec::new();
        resampler.process(&input, &mut out).expect("process")
    }

    #[test]
    fn retargeted_resampler_runs_at_the_new_ratio() {
        let mut resampler = LibResampler::new(22_050, 48_000).expect("resampler");
        resampler.set_rates(11_025, 48_000).expect("retarget");
        assert_eq!(resampler.rates(), (11_025, 48_000));

        let produced = frames_for_one_second(&mut resampler, 11_025);
        assert!((47_000..=48_100).contains(&produced), "produced {produced} frames");
    }

    #[test]
    fn reset_keeps_the_retargeted_ratio() {
        let mut resampler = LibResampler::new(22_050, 48_000).expect("resampler");
        resampler.set_rates(32_000, 48_000).expect("retarget");
        frames_for_one_second(&mut resampler, 32_000);
        resampler.reset();

        let produced = frames_for_one_second(&mut resampler, 32_000);
        assert!((47_000..=48_100).contains(&produced), "produced {produced} frames");
    }

    #[test]
    fn output_never_outgrows_the_presized_block() {
        let mut resampler = LibResampler::new(44_100, 48_000).expect("resampler");
        let delay = resampler.inner.output_delay();
        for len in [1usize, 7, 441, 1023, 1024, 1025, 3000] {
            let input = vec![AudioFrame::splat(500.0); len];
            let mut out = Vec::new();
            let produced = resampler.process(&input, &mut out).expect("process");
            assert_eq!(produced, out.len());
            assert!(produced <= resampler.estimate_out_frames(len) + delay);
        }
    }
}
