//! Client format derivation.
//!
//! Whatever the native file format is, decoded audio is normalized to a
//! fixed client format (stereo, 32-bit float, one frame per packet) before
//! it enters the processing chain. The negotiator also produces an
//! intermediate destination format that keeps the source sample rate but
//! forces floating-point samples; the native backend performs the actual
//! sample/channel conversion.

use wave_types::{AudioEncoding, WaveFormat};

/// Fixed client format all decoded audio is converted to.
///
/// Invariant: `bytes_per_frame == 4 * channels` (32-bit float samples) and
/// `bytes_per_packet == bytes_per_frame * frames_per_packet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientFormat {
    /// Sample rate in Hz, taken from the source.
    pub sample_rate: u32,
    /// Channel count, fixed at 2.
    pub channels: u16,
    /// Bits per sample per channel, fixed at 32.
    pub bits_per_sample: u16,
    /// Frames per packet, fixed at 1.
    pub frames_per_packet: u16,
    /// Bytes per frame (`4 * channels`).
    pub bytes_per_frame: u16,
    /// Bytes per packet (`bytes_per_frame * frames_per_packet`).
    pub bytes_per_packet: u16,
}

impl ClientFormat {
    /// The client format expressed as a [`WaveFormat`].
    pub fn wave_format(&self) -> WaveFormat {
        WaveFormat::new(
            self.sample_rate,
            self.bits_per_sample,
            self.channels,
            AudioEncoding::IeeeFloat,
        )
    }
}

/// Derive the intermediate destination format and the client format from a
/// native source format.
///
/// The intermediate format matches the source sample rate and channel count
/// but forces IEEE-float samples. The client format additionally fixes two
/// channels and one frame per packet. No mixing logic lives here; the
/// backend converts when it honors [`set_client_format`]
/// (`MediaFile::set_client_format`).
///
/// [`set_client_format`]: crate::backend::MediaFile::set_client_format
pub fn negotiate(source: &WaveFormat) -> (WaveFormat, ClientFormat) {
    let intermediate = WaveFormat::new(
        source.sample_rate,
        32,
        source.channels,
        AudioEncoding::IeeeFloat,
    );

    let channels = 2u16;
    let bytes_per_frame = 4 * channels;
    let frames_per_packet = 1u16;
    let client = ClientFormat {
        sample_rate: source.sample_rate,
        channels,
        bits_per_sample: 32,
        frames_per_packet,
        bytes_per_frame,
        bytes_per_packet: bytes_per_frame * frames_per_packet,
    };

    (intermediate, client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_keeps_source_rate_and_forces_float() {
        let src = WaveFormat::new(96_000, 24, 6, AudioEncoding::Pcm);
        let (intermediate, client) = negotiate(&src);

        assert_eq!(intermediate.sample_rate, 96_000);
        assert_eq!(intermediate.channels, 6);
        assert_eq!(intermediate.encoding, AudioEncoding::IeeeFloat);
        assert_eq!(intermediate.bits_per_sample, 32);

        assert_eq!(client.sample_rate, 96_000);
        assert_eq!(client.channels, 2);
        assert_eq!(client.bytes_per_frame, 8);
        assert_eq!(client.frames_per_packet, 1);
        assert_eq!(client.bytes_per_packet, 8);
    }

    #[test]
    fn client_wave_format_block_align_matches_bytes_per_frame() {
        let src = WaveFormat::new(44_100, 16, 2, AudioEncoding::Pcm);
        let (_, client) = negotiate(&src);
        let fmt = client.wave_format();

        assert_eq!(fmt.block_align, client.bytes_per_frame);
        assert_eq!(fmt.encoding, AudioEncoding::IeeeFloat);
    }
}
