//! Device-native sample decoding.
//!
//! Devices hand the mixer raw buffers in whatever format their hardware
//! produced. [`SampleBlock`] tags the element type and [`SampleLayout`]
//! carries the channel count and byte order, so a single runtime decoder
//! covers every format instead of one instantiation per combination.

use once_cell::sync::Lazy;

use crate::frame::{AudioFrame, MAX_16BIT_SAMPLE_VALUE};

/// Offset applied to unsigned 16-bit (and wider) payloads.
const UNSIGNED_16BIT_OFFSET: i32 = 32768;

/// Unsigned 8-bit to 16-bit-domain lookup table.
pub static LUT_U8_TO_16: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut lut = [0i16; 256];
    for (value, entry) in lut.iter_mut().enumerate() {
        *entry = u8_to_16(value as u8);
    }
    lut
});

/// Signed 8-bit to 16-bit-domain lookup table, indexed by the raw byte.
pub static LUT_S8_TO_16: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut lut = [0i16; 256];
    for (byte, entry) in lut.iter_mut().enumerate() {
        *entry = s8_to_16(byte as u8 as i8);
    }
    lut
});

fn u8_to_16(value: u8) -> i16 {
    let signed = i32::from(value) - 128;
    if signed > 0 {
        let scalar = f64::from(MAX_16BIT_SAMPLE_VALUE) / 127.0;
        (f64::from(signed) * scalar).round() as i16
    } else {
        (signed * 256) as i16
    }
}

fn s8_to_16(value: i8) -> i16 {
    let signed = i32::from(value);
    if signed > 0 {
        let scalar = f64::from(MAX_16BIT_SAMPLE_VALUE) / 127.0;
        (f64::from(signed) * scalar).round() as i16
    } else {
        (signed * 256) as i16
    }
}

/// Byte order of multi-byte samples relative to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// Samples are already in host order.
    Native,
    /// Samples need their bytes swapped.
    Swapped,
}

/// Channel count and byte order of a sample block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleLayout {
    /// Two interleaved samples per frame when true, one otherwise.
    pub stereo: bool,
    /// Byte order of 16/32-bit payloads.
    pub order: ByteOrder,
}

impl SampleLayout {
    /// Mono, host byte order.
    pub const MONO: SampleLayout = SampleLayout {
        stereo: false,
        order: ByteOrder::Native,
    };

    /// Interleaved stereo, host byte order.
    pub const STEREO: SampleLayout = SampleLayout {
        stereo: true,
        order: ByteOrder::Native,
    };

    /// Mono with swapped byte order.
    pub const MONO_SWAPPED: SampleLayout = SampleLayout {
        stereo: false,
        order: ByteOrder::Swapped,
    };

    /// Stereo with swapped byte order.
    pub const STEREO_SWAPPED: SampleLayout = SampleLayout {
        stereo: true,
        order: ByteOrder::Swapped,
    };

    /// Samples per frame.
    pub fn channels(&self) -> usize {
        if self.stereo { 2 } else { 1 }
    }
}

/// A borrowed block of native samples tagged with its element type.
#[derive(Clone, Copy, Debug)]
pub enum SampleBlock<'a> {
    /// Unsigned 8-bit, silence at 128.
    U8(&'a [u8]),
    /// Signed 8-bit.
    S8(&'a [i8]),
    /// Signed 16-bit.
    S16(&'a [i16]),
    /// Unsigned 16-bit, silence at 32768.
    U16(&'a [u16]),
    /// Signed 32-bit carrying a 16-bit payload.
    S32(&'a [i32]),
    /// Floats already in the canonical domain.
    F32(&'a [f32]),
}

impl SampleBlock<'_> {
    /// Number of raw samples in the block.
    pub fn len(&self) -> usize {
        match self {
            SampleBlock::U8(d) => d.len(),
            SampleBlock::S8(d) => d.len(),
            SampleBlock::S16(d) => d.len(),
            SampleBlock::U16(d) => d.len(),
            SampleBlock::S32(d) => d.len(),
            SampleBlock::F32(d) => d.len(),
        }
    }

    /// True when the block holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole frames available for the given layout.
    pub fn frames(&self, layout: SampleLayout) -> usize {
        self.len() / layout.channels()
    }

    fn sample(&self, index: usize, order: ByteOrder) -> f32 {
        let swap = order == ByteOrder::Swapped;
        match self {
            SampleBlock::U8(d) => f32::from(LUT_U8_TO_16[usize::from(d[index])]),
            SampleBlock::S8(d) => f32::from(LUT_S8_TO_16[usize::from(d[index] as u8)]),
            SampleBlock::S16(d) => {
                let v = if swap { d[index].swap_bytes() } else { d[index] };
                f32::from(v)
            }
            SampleBlock::U16(d) => {
                let v = if swap { d[index].swap_bytes() } else { d[index] };
                (i32::from(v) - UNSIGNED_16BIT_OFFSET) as f32
            }
            SampleBlock::S32(d) => {
                let v = if swap { d[index].swap_bytes() } else { d[index] };
                v as f32
            }
            SampleBlock::F32(d) => d[index],
        }
    }

    /// Decode frame `pos` into `frame`.
    ///
    /// Mono blocks only write the left side; the right side keeps whatever
    /// the caller held, matching how mono frames are later replicated from
    /// the left sample.
    pub fn decode_into(&self, pos: usize, layout: SampleLayout, frame: &mut AudioFrame) {
        if layout.stereo {
            frame.left = self.sample(pos * 2, layout.order);
            frame.right = self.sample(pos * 2 + 1, layout.order);
        } else {
            frame.left = self.sample(pos, layout.order);
        }
    }
}
