//! CPAL implementation of the output sink.
//!
//! The engine hands the sink fixed-size byte buffers in the chain's output
//! format; the sink converts them to `f32`, queues them behind the device
//! callback, and reports how many submitted buffers have been fully consumed
//! so the engine can keep its buffer rotation topped up.
//!
//! CPAL streams are not `Send`, so the stream lives on a dedicated thread
//! owned by the sink. Transport commands (play/pause/shutdown) travel over a
//! channel and are acknowledged so callers observe transport state changes
//! synchronously.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};
use wave_types::{AudioEncoding, WaveFormat};

use crate::backend::{OutputBackend, OutputSink};
use crate::config::PlaybackConfig;
use crate::device::{pick_device, pick_output_config, supports_float32_output};
use crate::error::PlayerError;
use crate::queue::SharedSamples;

/// No device error recorded.
pub const ERR_NONE: i32 = 0;
/// Building the output stream failed.
pub const ERR_BUILD_STREAM: i32 = -1;
/// Starting the transport failed.
pub const ERR_PLAY: i32 = -2;
/// Suspending the transport failed.
pub const ERR_PAUSE: i32 = -3;
/// The running stream reported an error.
pub const ERR_STREAM: i32 = -4;

/// Frames the device callback pulls from the queue per refill.
const CALLBACK_REFILL_FRAMES: usize = 1024;

/// Opens CPAL output devices, optionally matched by name substring.
pub struct CpalOutputBackend {
    needle: Option<String>,
    config: PlaybackConfig,
}

impl CpalOutputBackend {
    pub fn new(needle: Option<String>, config: PlaybackConfig) -> Self {
        Self { needle, config }
    }
}

impl OutputBackend for CpalOutputBackend {
    fn open_device(&self) -> Result<Box<dyn OutputSink>, PlayerError> {
        let host = cpal::default_host();
        let device = pick_device(&host, self.needle.as_deref())?;
        let float32 = supports_float32_output(&device);
        if let Ok(desc) = device.description() {
            tracing::info!(device = %desc, float32 = float32, "opened output device");
        }
        Ok(Box::new(CpalSink {
            device,
            sink_buffer_seconds: self.config.sink_buffer_seconds,
            float32,
            format: None,
            queue: None,
            stream: None,
            consumed_frames: Arc::new(AtomicU64::new(0)),
            error_code: Arc::new(AtomicI32::new(ERR_NONE)),
            submitted_ends: VecDeque::new(),
            submitted_total_frames: 0,
            processed_count: 0,
            baseline_frames: 0,
        }))
    }
}

enum StreamCommand {
    Play(Sender<Result<(), String>>),
    Suspend(Sender<Result<(), String>>),
    Shutdown,
}

struct StreamHandle {
    cmd_tx: Sender<StreamCommand>,
    join: Option<JoinHandle<()>>,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(StreamCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// One opened output device plus its (lazily built) stream.
pub struct CpalSink {
    device: cpal::Device,
    sink_buffer_seconds: f32,
    float32: bool,
    format: Option<WaveFormat>,
    queue: Option<Arc<SharedSamples>>,
    stream: Option<StreamHandle>,
    /// Source frames the device callback has pulled off the queue.
    consumed_frames: Arc<AtomicU64>,
    error_code: Arc<AtomicI32>,
    /// Cumulative frame count at the end of each in-flight buffer.
    submitted_ends: VecDeque<u64>,
    submitted_total_frames: u64,
    processed_count: u64,
    baseline_frames: u64,
}

impl CpalSink {
    fn send_command(
        &self,
        make: impl FnOnce(Sender<Result<(), String>>) -> StreamCommand,
        failure_code: i32,
    ) -> Result<(), PlayerError> {
        let handle = self
            .stream
            .as_ref()
            .ok_or_else(|| PlayerError::init("sink not configured"))?;
        let (ack_tx, ack_rx) = bounded(1);
        if handle.cmd_tx.send(make(ack_tx)).is_err() {
            self.error_code.store(failure_code, Ordering::Relaxed);
            return Err(PlayerError::Device { code: failure_code });
        }
        match ack_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => {
                tracing::warn!(error = %msg, "transport command failed");
                self.error_code.store(failure_code, Ordering::Relaxed);
                Err(PlayerError::Device { code: failure_code })
            }
            Err(_) => {
                self.error_code.store(failure_code, Ordering::Relaxed);
                Err(PlayerError::Device { code: failure_code })
            }
        }
    }
}

impl OutputSink for CpalSink {
    fn supports_float32(&self) -> bool {
        self.float32
    }

    fn configure(&mut self, format: &WaveFormat) -> Result<(), PlayerError> {
        self.stream = None;

        let supported = pick_output_config(&self.device, format.sample_rate)?;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.config();

        let max_samples =
            ((format.sample_rate as f32 * self.sink_buffer_seconds) as usize).max(1) * 2;
        let queue = Arc::new(SharedSamples::new(2, max_samples));

        self.consumed_frames.store(0, Ordering::Relaxed);
        self.error_code.store(ERR_NONE, Ordering::Relaxed);
        self.submitted_ends.clear();
        self.submitted_total_frames = 0;
        self.processed_count = 0;
        self.baseline_frames = 0;

        let (build_tx, build_rx) = bounded(1);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();

        let device = self.device.clone();
        let queue_cb = queue.clone();
        let consumed = self.consumed_frames.clone();
        let error_code = self.error_code.clone();
        let join = std::thread::Builder::new()
            .name("cpal-stream".into())
            .spawn(move || {
                run_stream_thread(
                    device,
                    stream_config,
                    sample_format,
                    queue_cb,
                    consumed,
                    error_code,
                    build_tx,
                    cmd_rx,
                );
            })
            .map_err(|e| PlayerError::init(format!("spawn stream thread: {e}")))?;

        match build_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                let _ = join.join();
                return Err(PlayerError::init(format!("build output stream: {msg}")));
            }
            Err(_) => {
                let _ = join.join();
                return Err(PlayerError::init("stream thread exited before build"));
            }
        }

        tracing::debug!(
            rate_hz = format.sample_rate,
            bits = format.bits_per_sample,
            device_format = ?sample_format,
            "configured output sink"
        );

        self.format = Some(*format);
        self.queue = Some(queue);
        self.stream = Some(StreamHandle {
            cmd_tx,
            join: Some(join),
        });
        Ok(())
    }

    fn enqueue(&mut self, bytes: &[u8]) -> Result<(), PlayerError> {
        let format = self
            .format
            .ok_or_else(|| PlayerError::init("sink not configured"))?;
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| PlayerError::init("sink not configured"))?;

        let samples = decode_samples(bytes, &format);
        let frames = (samples.len() / 2) as u64;
        queue.push_blocking(&samples);

        self.submitted_total_frames += frames;
        self.submitted_ends.push_back(self.submitted_total_frames);
        Ok(())
    }

    fn processed_buffers(&mut self) -> u64 {
        let consumed = self
            .consumed_frames
            .load(Ordering::Relaxed)
            .saturating_sub(self.baseline_frames);
        while let Some(&end) = self.submitted_ends.front() {
            if end > consumed {
                break;
            }
            self.submitted_ends.pop_front();
            self.processed_count += 1;
        }
        self.processed_count
    }

    fn start(&mut self) -> Result<(), PlayerError> {
        self.send_command(StreamCommand::Play, ERR_PLAY)
    }

    fn suspend(&mut self) -> Result<(), PlayerError> {
        self.send_command(StreamCommand::Suspend, ERR_PAUSE)
    }

    fn halt(&mut self) {
        let _ = self.send_command(StreamCommand::Suspend, ERR_PAUSE);
        if let Some(queue) = &self.queue {
            queue.flush();
        }
        self.submitted_ends.clear();
        self.submitted_total_frames = 0;
        self.processed_count = 0;
        self.baseline_frames = self.consumed_frames.load(Ordering::Relaxed);
    }

    fn last_error(&self) -> i32 {
        self.error_code.load(Ordering::Relaxed)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stream = None;
        if let Some(queue) = &self.queue {
            queue.close();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_stream_thread(
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: Arc<SharedSamples>,
    consumed: Arc<AtomicU64>,
    error_code: Arc<AtomicI32>,
    build_tx: Sender<Result<(), String>>,
    cmd_rx: Receiver<StreamCommand>,
) {
    let built = match sample_format {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &config, queue, consumed, &error_code)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, queue, consumed, &error_code)
        }
        cpal::SampleFormat::I32 => {
            build_stream::<i32>(&device, &config, queue, consumed, &error_code)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &config, queue, consumed, &error_code)
        }
        other => Err(format!("unsupported sample format: {other:?}")),
    };

    let stream = match built {
        Ok(s) => {
            let _ = build_tx.send(Ok(()));
            s
        }
        Err(msg) => {
            error_code.store(ERR_BUILD_STREAM, Ordering::Relaxed);
            let _ = build_tx.send(Err(msg));
            return;
        }
    };

    // The stream must stay on this thread until shutdown.
    loop {
        match cmd_rx.recv() {
            Ok(StreamCommand::Play(ack)) => {
                let _ = ack.send(stream.play().map_err(|e| e.to_string()));
            }
            Ok(StreamCommand::Suspend(ack)) => {
                let _ = ack.send(stream.pause().map_err(|e| e.to_string()));
            }
            Ok(StreamCommand::Shutdown) | Err(_) => break,
        }
    }
}

/// Type-specialized stream builder for CPAL sample formats.
///
/// The callback drains the shared queue in bursts, maps the stereo source
/// layout onto the device channel count, and fills underruns with silence.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<SharedSamples>,
    consumed: Arc<AtomicU64>,
    error_code: &Arc<AtomicI32>,
) -> Result<cpal::Stream, String>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let mut src: Vec<f32> = Vec::new();
    let mut pos = 0usize;

    let err_code = error_code.clone();
    let err_fn = move |err| {
        tracing::warn!("stream error: {err}");
        err_code.store(ERR_STREAM, Ordering::Relaxed);
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let frames = data.len() / channels_out;
                for frame in 0..frames {
                    if pos >= src.len() {
                        src.clear();
                        pos = 0;
                        match queue.pop_chunk(CALLBACK_REFILL_FRAMES) {
                            Some(v) => src = v,
                            None => {
                                for idx in (frame * channels_out)..data.len() {
                                    data[idx] = <T as cpal::Sample>::from_sample::<f32>(0.0);
                                }
                                return;
                            }
                        }
                    }
                    let left = src[pos];
                    let right = src[pos + 1];
                    pos += 2;
                    consumed.fetch_add(1, Ordering::Relaxed);

                    for ch in 0..channels_out {
                        let sample = map_stereo_to(left, right, channels_out, ch);
                        data[frame * channels_out + ch] =
                            <T as cpal::Sample>::from_sample::<f32>(sample);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| e.to_string())
}

/// Map one stereo frame onto the device channel layout.
///
/// Mono gets the L/R average; stereo passes through; wider layouts keep the
/// front pair and silence the rest.
fn map_stereo_to(left: f32, right: f32, dst_channels: usize, dst_ch: usize) -> f32 {
    match (dst_channels, dst_ch) {
        (1, 0) => 0.5 * (left + right),
        (_, 0) => left,
        (_, 1) => right,
        _ => 0.0,
    }
}

/// Decode one enqueued byte buffer into interleaved `f32` samples.
fn decode_samples(bytes: &[u8], format: &WaveFormat) -> Vec<f32> {
    match (format.encoding, format.bits_per_sample) {
        (AudioEncoding::Pcm, 8) => bytes
            .iter()
            .map(|&b| (i16::from(b) - 128) as f32 / 128.0)
            .collect(),
        (AudioEncoding::Pcm, 16) => bytes
            .chunks_exact(2)
            .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32_768.0)
            .collect(),
        (AudioEncoding::IeeeFloat, 32) => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_samples_u8_midpoint_is_silence() {
        let format = WaveFormat::new(44_100, 8, 2, AudioEncoding::Pcm);
        let out = decode_samples(&[128, 128, 255, 0], &format);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 127.0 / 128.0).abs() < 1e-6);
        assert_eq!(out[3], -1.0);
    }

    #[test]
    fn decode_samples_i16_scales_to_unit_range() {
        let format = WaveFormat::new(44_100, 16, 2, AudioEncoding::Pcm);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i16.to_le_bytes());
        bytes.extend_from_slice(&i16::MIN.to_le_bytes());
        bytes.extend_from_slice(&16_384i16.to_le_bytes());
        let out = decode_samples(&bytes, &format);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
        assert!((out[2] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn decode_samples_float_passes_through() {
        let format = WaveFormat::new(44_100, 32, 2, AudioEncoding::IeeeFloat);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.75f32).to_le_bytes());
        let out = decode_samples(&bytes, &format);
        assert_eq!(out, vec![0.25, -0.75]);
    }

    #[test]
    fn map_stereo_to_mono_averages() {
        assert_eq!(map_stereo_to(0.5, -0.5, 1, 0), 0.0);
        assert_eq!(map_stereo_to(1.0, 0.0, 1, 0), 0.5);
    }

    #[test]
    fn map_stereo_to_wider_layouts_silences_extras() {
        assert_eq!(map_stereo_to(0.1, 0.2, 6, 0), 0.1);
        assert_eq!(map_stereo_to(0.1, 0.2, 6, 1), 0.2);
        assert_eq!(map_stereo_to(0.1, 0.2, 6, 4), 0.0);
    }
}
