//! Decoded-audio playback core.
//!
//! Two tightly coupled halves:
//! - the **decoder** ([`decoder::WaveDecoder`]) normalizes any supported
//!   input into a fixed stereo/32-bit-float client format and exposes a
//!   byte-oriented read/seek surface with frame-accurate positioning;
//! - the **playback engine** ([`engine::PlaybackEngine`]) drives a
//!   source → volume → bit-depth chain into a rotating set of device
//!   buffers on a latency-derived cadence.
//!
//! Native backends (file decoding, device output) sit behind the traits in
//! [`backend`]; production implementations use Symphonia ([`decode`]) and
//! CPAL ([`sink`]).

pub mod backend;
pub mod config;
pub mod convert;
pub mod decode;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod error;
pub mod format;
pub mod queue;
pub mod sink;
pub mod source;
pub mod volume;
