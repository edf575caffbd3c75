//! Error taxonomy for the decoder and playback engine.
//!
//! Decode-time and construction-time failures are synchronous and returned
//! to the caller. Playback-time failures happen on the refill worker and are
//! surfaced through the stopped notification plus [`last_error`]
//! (`PlaybackEngine::last_error`), never as a panic.
//!
//! [`last_error`]: crate::engine::PlaybackEngine::last_error

use thiserror::Error;

/// Failure reported by a native backend implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Opening the file/device failed.
    #[error("open failed: {0}")]
    Open(String),
    /// The requested client format was rejected.
    #[error("client format rejected: {0}")]
    Format(String),
    /// Reading frames from the backend failed.
    #[error("read failed: {0}")]
    Read(String),
    /// Seeking the backend failed.
    #[error("seek failed: {0}")]
    Seek(String),
}

/// Errors surfaced by the decoder and the playback engine.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// A caller-supplied argument was rejected at the boundary; no state
    /// was mutated.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The object was disposed before the call.
    #[error("{0} already disposed")]
    Disposed(&'static str),
    /// Construction-time failure; all partially acquired native resources
    /// were released before this propagated.
    #[error("initialization failed: {0}")]
    Initialization(String),
    /// Device transport or enqueue failure, with the backend error code.
    #[error("device error (code {code})")]
    Device { code: i32 },
    /// Backend failure during read/seek after construction.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl PlayerError {
    /// Wrap a backend failure that occurred during construction.
    pub fn init(err: impl std::fmt::Display) -> Self {
        Self::Initialization(err.to_string())
    }
}
