//! Byte-oriented decoder over a native media file.
//!
//! [`WaveDecoder`] negotiates the fixed client format with the backend,
//! owns a single reusable scratch buffer sized for one decode quantum, and
//! translates between byte and frame addressing for read/seek. All
//! operations on one instance are serialized by a per-instance lock;
//! callers may invoke them from any thread but concurrent calls block
//! rather than interleave.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use wave_types::WaveFormat;

use crate::backend::{MediaBackend, MediaFile};
use crate::error::PlayerError;
use crate::format::{self, ClientFormat};
use crate::source::WaveSource;

/// Frames decoded per backend pull. A fixed decoding chunk size, distinct
/// from the playback engine's latency-driven refill cadence.
pub const DECODE_QUANTUM_FRAMES: usize = 2048;

struct Inner {
    file: Option<Box<dyn MediaFile>>,
    /// Reusable native-read buffer, exactly one decode quantum.
    scratch: Vec<u8>,
    /// Audio-relative position in frames (leading frames excluded).
    position: u64,
}

/// Decoder exposing a byte-oriented `read`/`position`/`len` surface while
/// operating internally in frames of the negotiated client format.
pub struct WaveDecoder {
    client: ClientFormat,
    wave_format: WaveFormat,
    total_frames: u64,
    /// Priming frames the codec inserts before the first audio sample.
    /// Skipped on every seek so positions stay audio-relative.
    leading_frames: u64,
    disposed: AtomicBool,
    inner: Mutex<Inner>,
}

impl WaveDecoder {
    /// Open `path` through `backend` and negotiate the client format.
    ///
    /// On any failure every partially acquired resource is released before
    /// the error propagates; a failed open leaves nothing live.
    pub fn open(backend: &dyn MediaBackend, path: &Path) -> Result<Self, PlayerError> {
        if path.as_os_str().is_empty() {
            return Err(PlayerError::InvalidArgument("path is empty"));
        }

        let mut file = backend.open(path).map_err(PlayerError::init)?;
        let source_format = file.file_format();
        let (intermediate, client) = format::negotiate(&source_format);
        tracing::debug!(
            rate_hz = intermediate.sample_rate,
            source_channels = source_format.channels,
            "negotiated client format"
        );

        file.set_client_format(&client).map_err(PlayerError::init)?;

        let leading_frames = file.leading_frames().unwrap_or(0);
        let total_frames = file.total_frames();
        let scratch = vec![0u8; DECODE_QUANTUM_FRAMES * usize::from(client.bytes_per_frame)];

        let decoder = Self {
            client,
            wave_format: client.wave_format(),
            total_frames,
            leading_frames,
            disposed: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                file: Some(file),
                scratch,
                position: 0,
            }),
        };

        // Seek to 0 up front: this skips the leading frames so the first
        // read starts at the first audio sample.
        decoder.set_position(0)?;
        Ok(decoder)
    }

    /// Read up to `count` bytes into `buffer` at `offset`.
    ///
    /// `count` is rounded down to a whole number of frames. The return
    /// value is less than the rounded count only at end of stream.
    pub fn read(
        &self,
        buffer: &mut [u8],
        offset: usize,
        count: usize,
    ) -> Result<usize, PlayerError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PlayerError::Disposed("decoder"));
        }
        if buffer.len() < offset + count {
            return Err(PlayerError::InvalidArgument(
                "buffer shorter than requested count",
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        let Inner {
            file,
            scratch,
            position,
        } = &mut *inner;
        let Some(file) = file.as_mut() else {
            // Lost a race with dispose(); treat as drained.
            return Ok(0);
        };

        let bytes_per_frame = usize::from(self.client.bytes_per_frame);
        let count = count - count % bytes_per_frame;

        let mut read = 0;
        while read < count {
            let chunk_bytes = (count - read).min(scratch.len());
            let chunk_frames = chunk_bytes / bytes_per_frame;

            let produced =
                file.read_frames(&mut scratch[..chunk_frames * bytes_per_frame], chunk_frames)?;
            if produced == 0 {
                break; // end of stream, not an error
            }

            let produced_bytes = produced * bytes_per_frame;
            buffer[offset + read..offset + read + produced_bytes]
                .copy_from_slice(&scratch[..produced_bytes]);
            read += produced_bytes;
        }

        *position += (read / bytes_per_frame) as u64;
        Ok(read)
    }

    /// Current audio-relative position in bytes; `0` once disposed.
    pub fn position(&self) -> u64 {
        if self.disposed.load(Ordering::Acquire) {
            return 0;
        }
        let inner = self.inner.lock().unwrap();
        inner.position * u64::from(self.client.bytes_per_frame)
    }

    /// Seek to a byte position, rounded down to a frame boundary.
    ///
    /// The native seek is shifted by the leading-frame count; the stored
    /// position stays audio-relative so `position()` reflects what the
    /// caller will hear, not the raw file offset.
    pub fn set_position(&self, bytes: u64) -> Result<(), PlayerError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PlayerError::Disposed("decoder"));
        }

        let mut inner = self.inner.lock().unwrap();
        let Some(file) = inner.file.as_mut() else {
            return Err(PlayerError::Disposed("decoder"));
        };

        let block_align = u64::from(self.wave_format.block_align);
        let aligned = bytes - bytes % block_align;
        let frame_offset = aligned / u64::from(self.client.bytes_per_frame);

        file.seek_frames(frame_offset + self.leading_frames)?;
        inner.position = frame_offset;
        Ok(())
    }

    /// Total stream length in bytes; `0` once disposed.
    pub fn len(&self) -> u64 {
        if self.disposed.load(Ordering::Acquire) {
            return 0;
        }
        self.total_frames * u64::from(self.client.bytes_per_frame)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seeking is always available for file-backed sources.
    pub fn can_seek(&self) -> bool {
        true
    }

    /// The client-side format: stereo, 32-bit IEEE float.
    pub fn wave_format(&self) -> WaveFormat {
        self.wave_format
    }

    /// Release the native handle and buffer memory.
    ///
    /// Idempotent and safe to call concurrently; only the first call
    /// observes live resources. Reads and seeks racing with dispose fail
    /// with [`PlayerError::Disposed`] or return a short read.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.file = None;
        inner.scratch = Vec::new();
    }
}

impl std::fmt::Debug for WaveDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveDecoder")
            .field("client", &self.client)
            .field("wave_format", &self.wave_format)
            .field("total_frames", &self.total_frames)
            .field("leading_frames", &self.leading_frames)
            .finish_non_exhaustive()
    }
}

impl Drop for WaveDecoder {
    fn drop(&mut self) {
        // Fallback path only; explicit dispose() is the primary release.
        self.dispose();
    }
}

impl WaveSource for WaveDecoder {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlayerError> {
        let count = buf.len();
        WaveDecoder::read(self, buf, 0, count)
    }

    fn wave_format(&self) -> WaveFormat {
        self.wave_format
    }
}
