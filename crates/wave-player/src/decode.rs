//! Symphonia-backed implementation of the media file backend.
//!
//! Probes the container, decodes packets into interleaved `f32`, converts
//! the channel layout to the fixed stereo client format, and serves frames
//! in exact `max_frames` portions by buffering packet remainders.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use wave_types::{AudioEncoding, WaveFormat};

use crate::backend::{MediaBackend, MediaFile};
use crate::error::BackendError;
use crate::format::ClientFormat;

/// Opens audio files through Symphonia's probe and codec registry.
pub struct SymphoniaBackend;

impl MediaBackend for SymphoniaBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaFile>, BackendError> {
        let file = File::open(path)
            .map_err(|e| BackendError::Open(format!("open {}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| BackendError::Open(e.to_string()))?;
        let reader = probed.format;

        let (track_id, params) = {
            let track = reader
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
                .ok_or_else(|| BackendError::Open("no audio track".into()))?;
            (track.id, track.codec_params.clone())
        };

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| BackendError::Open("unknown sample rate".into()))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let bits = params.bits_per_sample.unwrap_or(16) as u16;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| BackendError::Open(e.to_string()))?;

        tracing::info!(
            rate_hz = sample_rate,
            channels = channels,
            bits = bits,
            "opened media file"
        );

        Ok(Box::new(SymphoniaFile {
            reader,
            decoder,
            track_id,
            source_format: WaveFormat::new(sample_rate, bits, channels, AudioEncoding::Pcm),
            total_frames: params.n_frames.unwrap_or(0),
            delay_frames: params.delay.map(u64::from),
            client: None,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
        }))
    }
}

/// One opened file: format reader + codec decoder + stereo sample buffer.
struct SymphoniaFile {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    source_format: WaveFormat,
    total_frames: u64,
    delay_frames: Option<u64>,
    client: Option<ClientFormat>,
    /// Interleaved stereo client-format samples not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames to drop after a coarse container seek so reads stay
    /// sample-accurate.
    skip_frames: u64,
}

impl SymphoniaFile {
    fn available_frames(&self) -> usize {
        (self.pending.len() - self.pending_pos) / 2
    }

    fn apply_skip(&mut self) {
        if self.skip_frames == 0 {
            return;
        }
        let drop = (self.skip_frames as usize).min(self.available_frames());
        self.pending_pos += drop * 2;
        self.skip_frames -= drop as u64;
        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
    }

    /// Decode packets until one for our track lands in `pending`.
    ///
    /// Returns `false` at end of stream.
    fn decode_next_packet(&mut self) -> Result<bool, BackendError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(BackendError::Read(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // Skip over corrupt packets rather than aborting the stream.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(e) => return Err(BackendError::Read(e.to_string())),
            };

            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            push_stereo(
                &mut self.pending,
                sample_buf.samples(),
                spec.channels.count(),
            );
            return Ok(true);
        }
    }
}

impl MediaFile for SymphoniaFile {
    fn file_format(&self) -> WaveFormat {
        self.source_format
    }

    fn set_client_format(&mut self, client: &ClientFormat) -> Result<(), BackendError> {
        if client.channels != 2 || client.bits_per_sample != 32 {
            return Err(BackendError::Format(
                "this backend converts to stereo 32-bit float only".into(),
            ));
        }
        if client.frames_per_packet != 1 {
            return Err(BackendError::Format("frames_per_packet must be 1".into()));
        }
        if client.sample_rate != self.source_format.sample_rate {
            return Err(BackendError::Format(
                "client sample rate must match the source".into(),
            ));
        }
        self.client = Some(*client);
        Ok(())
    }

    fn read_frames(&mut self, buf: &mut [u8], max_frames: usize) -> Result<usize, BackendError> {
        if self.client.is_none() {
            return Err(BackendError::Format("client format not set".into()));
        }

        loop {
            self.apply_skip();
            if self.available_frames() >= max_frames {
                break;
            }
            if !self.decode_next_packet()? {
                self.apply_skip();
                break;
            }
        }

        let take = max_frames.min(self.available_frames());
        let start = self.pending_pos;
        for (i, sample) in self.pending[start..start + take * 2].iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&sample.to_le_bytes());
        }
        self.pending_pos += take * 2;
        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
        Ok(take)
    }

    fn seek_frames(&mut self, frame_offset: u64) -> Result<(), BackendError> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame_offset,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| BackendError::Seek(e.to_string()))?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        // Containers seek to packet boundaries; drop the lead-in frames so
        // the next read starts exactly at the requested frame.
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        Ok(())
    }

    fn leading_frames(&self) -> Option<u64> {
        self.delay_frames
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

/// Convert an interleaved packet to the stereo client layout.
///
/// Mono is duplicated; layouts beyond stereo fold the average of the extra
/// channels into L and R, clamped to the unit range so the fold cannot
/// clip past full scale.
fn push_stereo(dst: &mut Vec<f32>, samples: &[f32], src_channels: usize) {
    match src_channels {
        0 => {}
        1 => {
            dst.reserve(samples.len() * 2);
            for &s in samples {
                dst.push(s);
                dst.push(s);
            }
        }
        2 => dst.extend_from_slice(samples),
        n => {
            dst.reserve(samples.len() / n * 2);
            for frame in samples.chunks_exact(n) {
                let extra = &frame[2..];
                let spill = extra.iter().sum::<f32>() / extra.len() as f32;
                dst.push((frame[0] + spill).clamp(-1.0, 1.0));
                dst.push((frame[1] + spill).clamp(-1.0, 1.0));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_stereo_duplicates_mono() {
        let mut dst = Vec::new();
        push_stereo(&mut dst, &[0.1, 0.2], 1);
        assert_eq!(dst, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn push_stereo_passes_stereo_through() {
        let mut dst = Vec::new();
        push_stereo(&mut dst, &[0.1, 0.2, 0.3, 0.4], 2);
        assert_eq!(dst, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn push_stereo_folds_extra_channels_into_front_pair() {
        let mut dst = Vec::new();
        // One quad frame: extra channels average to 0.4.
        push_stereo(&mut dst, &[0.2, 0.4, 0.2, 0.6], 4);
        assert_eq!(dst.len(), 2);
        assert!((dst[0] - 0.6).abs() < 1e-6);
        assert!((dst[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn push_stereo_downmix_clamps_to_unit_range() {
        let mut dst = Vec::new();
        // Two quad frames whose folds would overshoot full scale.
        push_stereo(
            &mut dst,
            &[0.9, 0.9, 0.8, 0.8, -0.9, -0.9, -0.8, -0.8],
            4,
        );
        assert_eq!(dst, vec![1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn push_stereo_ignores_zero_channels() {
        let mut dst = Vec::new();
        push_stereo(&mut dst, &[], 0);
        assert!(dst.is_empty());
    }
}
