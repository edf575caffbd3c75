//! Bit-depth selection and the sample→byte output stage.

use wave_types::{AudioEncoding, WaveFormat};

use crate::error::PlayerError;
use crate::source::{SampleSource, WaveSource};

/// Output sample width the device stream is fed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitDepth {
    /// 8-bit unsigned PCM.
    Int8,
    /// 16-bit signed little-endian PCM.
    Int16,
    /// 32-bit IEEE float little-endian.
    Float32,
}

impl BitDepth {
    pub fn bits(self) -> u16 {
        match self {
            Self::Int8 => 8,
            Self::Int16 => 16,
            Self::Float32 => 32,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        usize::from(self.bits()) / 8
    }

    pub fn encoding(self) -> AudioEncoding {
        match self {
            Self::Int8 | Self::Int16 => AudioEncoding::Pcm,
            Self::Float32 => AudioEncoding::IeeeFloat,
        }
    }
}

/// Choose the output width for a source depth, given device capability.
///
/// The mapping is a fixed table, chosen once at session initialization:
/// `{8→8, 16→16, 24→capability max, 32→capability max, other→16}` where
/// the capability max is 32-bit float when the device supports it, else 16.
pub fn select_bit_depth(source_bits: u16, float32_supported: bool) -> BitDepth {
    let capability_max = if float32_supported {
        BitDepth::Float32
    } else {
        BitDepth::Int16
    };
    match source_bits {
        8 => BitDepth::Int8,
        16 => BitDepth::Int16,
        24 => capability_max,
        32 => capability_max,
        _ => BitDepth::Int16,
    }
}

/// Pull-based transform encoding `f32` samples to the selected output width.
pub struct BitDepthWriter<S: SampleSource> {
    inner: S,
    depth: BitDepth,
    format: WaveFormat,
    scratch: Vec<f32>,
}

impl<S: SampleSource> BitDepthWriter<S> {
    pub fn new(inner: S, depth: BitDepth) -> Self {
        let src = inner.wave_format();
        let format = WaveFormat::new(src.sample_rate, depth.bits(), src.channels, depth.encoding());
        Self {
            inner,
            depth,
            format,
            scratch: Vec::new(),
        }
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }
}

impl<S: SampleSource> WaveSource for BitDepthWriter<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlayerError> {
        let bytes_per_sample = self.depth.bytes_per_sample();
        let want_samples = buf.len() / bytes_per_sample;
        if self.scratch.len() < want_samples {
            self.scratch.resize(want_samples, 0.0);
        }

        let n = self.inner.read(&mut self.scratch[..want_samples])?;
        match self.depth {
            BitDepth::Int8 => {
                for (dst, sample) in buf.iter_mut().zip(&self.scratch[..n]) {
                    *dst = encode_u8(*sample);
                }
            }
            BitDepth::Int16 => {
                for (dst, sample) in buf.chunks_exact_mut(2).zip(&self.scratch[..n]) {
                    dst.copy_from_slice(&encode_i16(*sample).to_le_bytes());
                }
            }
            BitDepth::Float32 => {
                for (dst, sample) in buf.chunks_exact_mut(4).zip(&self.scratch[..n]) {
                    dst.copy_from_slice(&sample.to_le_bytes());
                }
            }
        }
        Ok(n * bytes_per_sample)
    }

    fn wave_format(&self) -> WaveFormat {
        self.format
    }
}

fn encode_u8(sample: f32) -> u8 {
    let clamped = sample.clamp(-1.0, 1.0);
    ((clamped * 127.0).round() as i32 + 128).clamp(0, 255) as u8
}

fn encode_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32_767.0).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSamples {
        data: Vec<f32>,
        pos: usize,
    }

    impl SampleSource for FixedSamples {
        fn read(&mut self, out: &mut [f32]) -> Result<usize, PlayerError> {
            let n = out.len().min(self.data.len() - self.pos);
            out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn wave_format(&self) -> WaveFormat {
            WaveFormat::new(44_100, 32, 2, AudioEncoding::IeeeFloat)
        }
    }

    #[test]
    fn selection_table_with_float32_device() {
        assert_eq!(select_bit_depth(8, true), BitDepth::Int8);
        assert_eq!(select_bit_depth(16, true), BitDepth::Int16);
        assert_eq!(select_bit_depth(24, true), BitDepth::Float32);
        assert_eq!(select_bit_depth(32, true), BitDepth::Float32);
    }

    #[test]
    fn selection_table_caps_at_16_without_float32() {
        assert_eq!(select_bit_depth(24, false), BitDepth::Int16);
        assert_eq!(select_bit_depth(32, false), BitDepth::Int16);
    }

    #[test]
    fn unmapped_depths_default_to_16() {
        assert_eq!(select_bit_depth(20, true), BitDepth::Int16);
        assert_eq!(select_bit_depth(12, false), BitDepth::Int16);
    }

    #[test]
    fn int8_encoding_is_unsigned_midpoint_128() {
        assert_eq!(encode_u8(0.0), 128);
        assert_eq!(encode_u8(1.0), 255);
        assert_eq!(encode_u8(-1.0), 1);
        assert_eq!(encode_u8(2.0), 255);
    }

    #[test]
    fn int16_encoding_clamps_and_scales() {
        assert_eq!(encode_i16(0.0), 0);
        assert_eq!(encode_i16(1.0), 32_767);
        assert_eq!(encode_i16(-1.0), -32_767);
        assert_eq!(encode_i16(1.5), 32_767);
    }

    #[test]
    fn writer_reports_converted_format() {
        let writer = BitDepthWriter::new(
            FixedSamples {
                data: vec![],
                pos: 0,
            },
            BitDepth::Int16,
        );
        let fmt = writer.wave_format();
        assert_eq!(fmt.bits_per_sample, 16);
        assert_eq!(fmt.block_align, 4);
        assert_eq!(fmt.encoding, AudioEncoding::Pcm);
    }

    #[test]
    fn writer_emits_float32_bytes_verbatim() {
        let mut writer = BitDepthWriter::new(
            FixedSamples {
                data: vec![0.5, -0.5],
                pos: 0,
            },
            BitDepth::Float32,
        );

        let mut buf = [0u8; 8];
        let n = writer.read(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf[..4], &0.5f32.to_le_bytes());
        assert_eq!(&buf[4..], &(-0.5f32).to_le_bytes());
    }

    #[test]
    fn writer_returns_zero_at_end_of_stream() {
        let mut writer = BitDepthWriter::new(
            FixedSamples {
                data: vec![],
                pos: 0,
            },
            BitDepth::Int16,
        );
        let mut buf = [0u8; 4];
        assert_eq!(writer.read(&mut buf).unwrap(), 0);
    }
}
