//! Volume scaling stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use wave_types::WaveFormat;

use crate::error::PlayerError;
use crate::source::SampleSource;

/// Shared gain in `[0.0, 1.0]`, readable from the engine and applied by the
/// refill worker's chain.
///
/// The initial value is `0.0` (silent), not full volume: callers must set
/// the gain explicitly before expecting audible output.
#[derive(Debug)]
pub struct VolumeControl {
    bits: AtomicU32,
}

impl VolumeControl {
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    /// Last accepted gain value.
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Set the gain, rejecting values outside `[0.0, 1.0]` (including NaN)
    /// without mutating the current value.
    pub fn set_volume(&self, value: f32) -> Result<(), PlayerError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(PlayerError::InvalidArgument(
                "volume must be within [0.0, 1.0]",
            ));
        }
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull-based transform multiplying every sample by the current gain.
pub struct VolumeSource<S: SampleSource> {
    inner: S,
    control: Arc<VolumeControl>,
}

impl<S: SampleSource> VolumeSource<S> {
    pub fn new(inner: S, control: Arc<VolumeControl>) -> Self {
        Self { inner, control }
    }
}

impl<S: SampleSource> SampleSource for VolumeSource<S> {
    fn read(&mut self, out: &mut [f32]) -> Result<usize, PlayerError> {
        let n = self.inner.read(out)?;
        // Gain is sampled once per read so a whole block scales uniformly.
        let gain = self.control.volume();
        if gain != 1.0 {
            for sample in &mut out[..n] {
                *sample *= gain;
            }
        }
        Ok(n)
    }

    fn wave_format(&self) -> WaveFormat {
        self.inner.wave_format()
    }
}
