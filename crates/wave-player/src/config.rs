//! Playback tuning parameters.

/// Tunables shared by the engine and the output sink.
///
/// The decode chunk size (2048 frames, see
/// [`crate::decoder::DECODE_QUANTUM_FRAMES`]) is deliberately not a knob
/// here: it is a fixed decoding quantum independent of the latency-driven
/// refill cadence.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Refill cadence in milliseconds. Observed end-to-end latency is
    /// approximately `latency_ms * DEVICE_BUFFER_COUNT`.
    pub latency_ms: u32,
    /// Target sink-side queue depth in seconds, used to bound the sample
    /// queue behind the device callback.
    pub sink_buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            latency_ms: 50,
            sink_buffer_seconds: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_latency_is_50ms() {
        let cfg = PlaybackConfig::default();
        assert_eq!(cfg.latency_ms, 50);
    }
}
