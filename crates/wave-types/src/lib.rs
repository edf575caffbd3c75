use serde::{Deserialize, Serialize};

/// Sample encoding of a PCM stream.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Integer PCM samples.
    Pcm,
    /// 32-bit IEEE float samples.
    IeeeFloat,
}

/// Fixed description of a PCM stream, immutable once a stream is opened.
///
/// `block_align` is derived in [`WaveFormat::new`] and always equals
/// `channels * bits_per_sample / 8` (bytes per frame). All reads and seeks
/// land on a multiple of this value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaveFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bits per sample per channel.
    pub bits_per_sample: u16,
    /// Channel count.
    pub channels: u16,
    /// Bytes per frame (`channels * bits_per_sample / 8`).
    pub block_align: u16,
    /// Sample encoding.
    pub encoding: AudioEncoding,
}

impl WaveFormat {
    /// Build a format, deriving `block_align` from channels and bit depth.
    pub fn new(
        sample_rate: u32,
        bits_per_sample: u16,
        channels: u16,
        encoding: AudioEncoding,
    ) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
            block_align: channels * (bits_per_sample / 8),
            encoding,
        }
    }

    /// Bytes per second at this format (`sample_rate * block_align`).
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.block_align)
    }
}

/// Playback engine state.
///
/// `Stopped` is both the initial and the terminal state.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No buffers queued; initial and terminal state.
    #[default]
    Stopped,
    /// Refill cadence active, buffers flowing to the device.
    Playing,
    /// Refill cadence suspended; device buffers retained.
    Paused,
}

/// Reason why playback transitioned to `Stopped`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of stream: the processing chain produced zero bytes.
    Eof,
    /// Device transport or enqueue error interrupted playback.
    Error,
    /// Playback was explicitly stopped by the caller.
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_align_derives_from_channels_and_depth() {
        let fmt = WaveFormat::new(44_100, 16, 2, AudioEncoding::Pcm);
        assert_eq!(fmt.block_align, 4);

        let fmt = WaveFormat::new(48_000, 32, 2, AudioEncoding::IeeeFloat);
        assert_eq!(fmt.block_align, 8);

        let fmt = WaveFormat::new(8_000, 8, 1, AudioEncoding::Pcm);
        assert_eq!(fmt.block_align, 1);
    }

    #[test]
    fn bytes_per_second_scales_with_rate() {
        let fmt = WaveFormat::new(44_100, 32, 2, AudioEncoding::IeeeFloat);
        assert_eq!(fmt.bytes_per_second(), 44_100 * 8);
    }

    #[test]
    fn playback_state_defaults_to_stopped() {
        assert_eq!(PlaybackState::default(), PlaybackState::Stopped);
    }
}
