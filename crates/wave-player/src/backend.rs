//! Native backend traits.
//!
//! The decoder and the playback engine never talk to Symphonia or CPAL
//! directly; they consume these traits so tests can substitute deterministic
//! backends. Production implementations live in [`crate::decode`] (file
//! decoding) and [`crate::sink`] (device output).

use std::path::Path;

use wave_types::WaveFormat;

use crate::error::{BackendError, PlayerError};
use crate::format::ClientFormat;

/// An opened native audio file.
///
/// Closing is `Drop`; implementations release their handle when dropped.
pub trait MediaFile: Send {
    /// The native format of the file as stored on disk.
    fn file_format(&self) -> WaveFormat;

    /// Request that subsequent reads produce frames in `client` format.
    ///
    /// Fails with [`BackendError::Format`] when the backend cannot honor
    /// the conversion.
    fn set_client_format(&mut self, client: &ClientFormat) -> Result<(), BackendError>;

    /// Decode up to `max_frames` frames into `buf` (client format bytes).
    ///
    /// Returns the number of frames produced; `0` signals end of stream and
    /// is not an error. `buf` must hold at least
    /// `max_frames * client.bytes_per_frame` bytes.
    fn read_frames(&mut self, buf: &mut [u8], max_frames: usize) -> Result<usize, BackendError>;

    /// Seek so the next read produces frame `frame_offset`.
    ///
    /// The offset is in the underlying file's frame space; callers account
    /// for leading frames themselves.
    fn seek_frames(&mut self, frame_offset: u64) -> Result<(), BackendError>;

    /// Priming/lookahead frames inserted by the codec, when reported.
    ///
    /// `None` means the backend cannot tell; absence is not an error.
    fn leading_frames(&self) -> Option<u64>;

    /// Total audio frames in the file.
    fn total_frames(&self) -> u64;
}

/// Opens native audio files.
pub trait MediaBackend: Send {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaFile>, BackendError>;
}

/// An opened native output device.
///
/// The playback engine pushes fixed-size byte buffers into a small rotation;
/// the sink reports how many of those buffers have been fully played so the
/// engine can keep the rotation topped up.
pub trait OutputSink: Send {
    /// Whether the device can take 32-bit float samples.
    fn supports_float32(&self) -> bool;

    /// Bind the sink to the processing chain's output format.
    ///
    /// Called once per session, before the first [`enqueue`].
    ///
    /// [`enqueue`]: OutputSink::enqueue
    fn configure(&mut self, format: &WaveFormat) -> Result<(), PlayerError>;

    /// Submit one buffer of audio in the configured format.
    fn enqueue(&mut self, bytes: &[u8]) -> Result<(), PlayerError>;

    /// Number of enqueued buffers the device has fully played.
    ///
    /// Monotonic within a session; reset by [`halt`](OutputSink::halt).
    fn processed_buffers(&mut self) -> u64;

    /// Start (or resume) the device transport.
    fn start(&mut self) -> Result<(), PlayerError>;

    /// Suspend the transport without discarding queued buffers.
    fn suspend(&mut self) -> Result<(), PlayerError>;

    /// Stop the transport and flush all queued buffers.
    fn halt(&mut self);

    /// Most recent device-level error code (`0` when none).
    fn last_error(&self) -> i32;
}

/// Opens native output devices.
pub trait OutputBackend: Send {
    fn open_device(&self) -> Result<Box<dyn OutputSink>, PlayerError>;
}
