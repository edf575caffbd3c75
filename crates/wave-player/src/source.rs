//! Pull-based source traits and the byte→sample adapter.
//!
//! The processing chain is wired as
//! `WaveDecoder → SampleReader → VolumeSource → BitDepthWriter → sink`.
//! Byte-oriented stages implement [`WaveSource`]; sample-oriented stages
//! implement [`SampleSource`].

use wave_types::WaveFormat;

use crate::error::PlayerError;

/// A byte-oriented pull source of PCM audio.
///
/// Reads return whole frames; a return of `0` signals end of stream and is
/// not an error.
pub trait WaveSource: Send {
    /// Fill `buf` with as many whole frames as are available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlayerError>;

    /// Format of the bytes this source produces.
    fn wave_format(&self) -> WaveFormat;
}

impl WaveSource for Box<dyn WaveSource> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlayerError> {
        (**self).read(buf)
    }

    fn wave_format(&self) -> WaveFormat {
        (**self).wave_format()
    }
}

/// A sample-oriented pull source of interleaved `f32` audio.
pub trait SampleSource: Send {
    /// Fill `out` with interleaved samples; `0` signals end of stream.
    fn read(&mut self, out: &mut [f32]) -> Result<usize, PlayerError>;

    /// Format of the stream these samples came from.
    fn wave_format(&self) -> WaveFormat;
}

/// Adapts an IEEE-float [`WaveSource`] into a [`SampleSource`].
///
/// The inner source must produce 32-bit float little-endian bytes (the
/// client format); each 4-byte group becomes one sample.
pub struct SampleReader<S: WaveSource> {
    inner: S,
    scratch: Vec<u8>,
}

impl<S: WaveSource> SampleReader<S> {
    pub fn new(inner: S) -> Self {
        debug_assert_eq!(inner.wave_format().bits_per_sample, 32);
        Self {
            inner,
            scratch: Vec::new(),
        }
    }
}

impl<S: WaveSource> SampleSource for SampleReader<S> {
    fn read(&mut self, out: &mut [f32]) -> Result<usize, PlayerError> {
        let want_bytes = out.len() * 4;
        if self.scratch.len() < want_bytes {
            self.scratch.resize(want_bytes, 0);
        }

        let bytes = self.inner.read(&mut self.scratch[..want_bytes])?;
        let samples = bytes / 4;
        for (sample, chunk) in out
            .iter_mut()
            .zip(self.scratch[..samples * 4].chunks_exact(4))
        {
            *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(samples)
    }

    fn wave_format(&self) -> WaveFormat {
        self.inner.wave_format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wave_types::AudioEncoding;

    struct BytesSource {
        data: Vec<u8>,
        pos: usize,
    }

    impl WaveSource for BytesSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlayerError> {
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn wave_format(&self) -> WaveFormat {
            WaveFormat::new(44_100, 32, 2, AudioEncoding::IeeeFloat)
        }
    }

    #[test]
    fn sample_reader_decodes_le_floats() {
        let mut data = Vec::new();
        for v in [0.25f32, -0.5, 1.0, 0.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut reader = SampleReader::new(BytesSource { data, pos: 0 });

        let mut out = [0.0f32; 4];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, [0.25, -0.5, 1.0, 0.0]);

        let n = reader.read(&mut out).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn sample_reader_handles_partial_tail() {
        let mut data = Vec::new();
        for v in [0.5f32, -0.25] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut reader = SampleReader::new(BytesSource { data, pos: 0 });

        let mut out = [0.0f32; 8];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&out[..2], &[0.5, -0.25]);
    }
}
