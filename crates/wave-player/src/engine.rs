//! Playback engine: session lifecycle, transport state machine, and the
//! latency-driven refill worker.
//!
//! One session corresponds to one `initialize` call: the engine opens an
//! output sink, builds the processing chain
//! (`SampleReader → VolumeSource → BitDepthWriter`), and spawns a worker
//! that keeps a small rotation of device buffers topped up. Transport calls
//! (`play`/`pause`/`stop`) travel to the worker over a channel and are
//! acknowledged, so callers observe the state change on return.
//!
//! Observed end-to-end latency is approximately
//! `latency_ms * DEVICE_BUFFER_COUNT`.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use wave_types::{PlaybackState, StopReason, WaveFormat};

use crate::backend::{OutputBackend, OutputSink};
use crate::config::PlaybackConfig;
use crate::convert::{BitDepthWriter, select_bit_depth};
use crate::error::PlayerError;
use crate::source::{SampleReader, WaveSource};
use crate::volume::{VolumeControl, VolumeSource};

/// Device buffers kept in rotation by the refill worker.
pub const DEVICE_BUFFER_COUNT: usize = 4;

/// Notification emitted once per transition into [`PlaybackState::Stopped`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoppedEvent {
    pub reason: StopReason,
    /// Device error code, present when `reason` is [`StopReason::Error`].
    pub error_code: Option<i32>,
}

enum Command {
    Play(Sender<Result<(), PlayerError>>),
    Pause(Sender<()>),
    Stop(Sender<()>),
    Shutdown,
}

struct Session {
    cmd_tx: Sender<Command>,
    join: Option<JoinHandle<()>>,
}

/// Drives decoded audio to an output device.
pub struct PlaybackEngine {
    backend: Box<dyn OutputBackend>,
    config: PlaybackConfig,
    volume: Arc<VolumeControl>,
    state: Arc<Mutex<PlaybackState>>,
    last_error: Arc<AtomicI32>,
    event_tx: Sender<StoppedEvent>,
    event_rx: Receiver<StoppedEvent>,
    session: Option<Session>,
    disposed: bool,
}

impl PlaybackEngine {
    pub fn new(backend: Box<dyn OutputBackend>) -> Self {
        Self::with_config(backend, PlaybackConfig::default())
    }

    pub fn with_config(backend: Box<dyn OutputBackend>, config: PlaybackConfig) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            backend,
            config,
            volume: Arc::new(VolumeControl::new()),
            state: Arc::new(Mutex::new(PlaybackState::Stopped)),
            last_error: Arc::new(AtomicI32::new(0)),
            event_tx,
            event_rx,
            session: None,
            disposed: false,
        }
    }

    /// Bind a source and prepare a playback session.
    ///
    /// Any prior session is torn down first. Volume and latency settings
    /// persist across sessions; playback starts with [`play`].
    ///
    /// [`play`]: PlaybackEngine::play
    pub fn initialize(&mut self, source: Box<dyn WaveSource>) -> Result<(), PlayerError> {
        self.check_disposed()?;
        self.teardown_session();

        let mut sink = self.backend.open_device()?;
        let source_format = source.wave_format();
        let depth = select_bit_depth(source_format.bits_per_sample, sink.supports_float32());

        let chain = BitDepthWriter::new(
            VolumeSource::new(SampleReader::new(source), self.volume.clone()),
            depth,
        );
        let chain_format = chain.wave_format();
        sink.configure(&chain_format)?;

        tracing::info!(
            rate_hz = chain_format.sample_rate,
            bits = chain_format.bits_per_sample,
            latency_ms = self.config.latency_ms,
            "playback session initialized"
        );

        let (cmd_tx, cmd_rx) = unbounded();
        let worker = Worker {
            sink,
            chain: Box::new(chain),
            chain_format,
            latency: Duration::from_millis(u64::from(self.config.latency_ms)),
            quantum_bytes: refill_quantum_bytes(self.config.latency_ms, &chain_format),
            state: self.state.clone(),
            last_error: self.last_error.clone(),
            event_tx: self.event_tx.clone(),
            cmd_rx,
        };
        let join = std::thread::Builder::new()
            .name("playback-refill".into())
            .spawn(move || worker.run())
            .map_err(|e| PlayerError::init(format!("spawn refill worker: {e}")))?;

        *self.state.lock().unwrap() = PlaybackState::Stopped;
        self.session = Some(Session {
            cmd_tx,
            join: Some(join),
        });
        Ok(())
    }

    /// Start or resume playback.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        self.check_disposed()?;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| PlayerError::init("engine not initialized"))?;
        let (ack_tx, ack_rx) = bounded(1);
        session
            .cmd_tx
            .send(Command::Play(ack_tx))
            .map_err(|_| PlayerError::init("refill worker gone"))?;
        ack_rx
            .recv()
            .map_err(|_| PlayerError::init("refill worker gone"))?
    }

    /// Suspend playback; queued audio is kept.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        self.check_disposed()?;
        if let Some(session) = &self.session {
            let (ack_tx, ack_rx) = bounded(1);
            if session.cmd_tx.send(Command::Pause(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
        Ok(())
    }

    /// Resume after [`pause`](PlaybackEngine::pause).
    pub fn resume(&mut self) -> Result<(), PlayerError> {
        self.play()
    }

    /// Stop playback and discard queued audio.
    ///
    /// No-op when already stopped; at most one stopped notification is
    /// emitted per active-to-stopped transition.
    pub fn stop(&mut self) -> Result<(), PlayerError> {
        self.check_disposed()?;
        if let Some(session) = &self.session {
            let (ack_tx, ack_rx) = bounded(1);
            if session.cmd_tx.send(Command::Stop(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
        Ok(())
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap()
    }

    /// Current gain in `[0.0, 1.0]`. Fresh engines report `0.0`.
    pub fn volume(&self) -> f32 {
        self.volume.volume()
    }

    pub fn set_volume(&self, value: f32) -> Result<(), PlayerError> {
        self.volume.set_volume(value)
    }

    /// Refill cadence in milliseconds.
    pub fn latency(&self) -> u32 {
        self.config.latency_ms
    }

    /// Change the refill cadence; takes effect at the next `initialize`.
    pub fn set_latency(&mut self, latency_ms: u32) -> Result<(), PlayerError> {
        if latency_ms == 0 {
            return Err(PlayerError::InvalidArgument("latency must be nonzero"));
        }
        self.config.latency_ms = latency_ms;
        Ok(())
    }

    /// Most recent device error code; `0` when none.
    pub fn last_error(&self) -> i32 {
        self.last_error.load(Ordering::Relaxed)
    }

    /// Receiver for stopped notifications. May be cloned and polled from any
    /// thread.
    pub fn events(&self) -> Receiver<StoppedEvent> {
        self.event_rx.clone()
    }

    /// Tear down the session and release the device. Idempotent; subsequent
    /// transport calls fail with [`PlayerError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.teardown_session();
        self.disposed = true;
    }

    fn check_disposed(&self) -> Result<(), PlayerError> {
        if self.disposed {
            return Err(PlayerError::Disposed("PlaybackEngine"));
        }
        Ok(())
    }

    fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.cmd_tx.send(Command::Shutdown);
            if let Some(join) = session.join.take() {
                let _ = join.join();
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Bytes per refill buffer: `latency_ms` worth of audio at the chain's
/// output format, at least one frame.
fn refill_quantum_bytes(latency_ms: u32, format: &WaveFormat) -> usize {
    let frames = (u64::from(latency_ms) * u64::from(format.sample_rate) / 1000).max(1) as usize;
    frames * usize::from(format.block_align)
}

struct Worker {
    sink: Box<dyn OutputSink>,
    chain: Box<dyn WaveSource>,
    chain_format: WaveFormat,
    latency: Duration,
    quantum_bytes: usize,
    state: Arc<Mutex<PlaybackState>>,
    last_error: Arc<AtomicI32>,
    event_tx: Sender<StoppedEvent>,
    cmd_rx: Receiver<Command>,
}

impl Worker {
    fn run(mut self) {
        let mut buf = vec![0u8; self.quantum_bytes];
        let mut submitted: u64 = 0;
        let mut eof = false;

        loop {
            let active = matches!(self.current_state(), PlaybackState::Playing);
            let command = if active {
                match self.cmd_rx.recv_timeout(self.latency) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => Some(Command::Shutdown),
                }
            } else {
                match self.cmd_rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => Some(Command::Shutdown),
                }
            };

            match command {
                Some(Command::Play(ack)) => {
                    let result = self.handle_play();
                    let _ = ack.send(result);
                }
                Some(Command::Pause(ack)) => {
                    if self.current_state() == PlaybackState::Playing {
                        let _ = self.sink.suspend();
                        self.set_state(PlaybackState::Paused);
                    }
                    let _ = ack.send(());
                }
                Some(Command::Stop(ack)) => {
                    self.stop_with(StopReason::Stopped, None, &mut submitted);
                    let _ = ack.send(());
                }
                Some(Command::Shutdown) => {
                    self.stop_with(StopReason::Stopped, None, &mut submitted);
                    break;
                }
                None => {
                    if let Err(code) = self.refill(&mut buf, &mut submitted, &mut eof) {
                        self.stop_with(StopReason::Error, Some(code), &mut submitted);
                        continue;
                    }
                    if eof && self.sink.processed_buffers() >= submitted {
                        tracing::debug!(buffers = submitted, "source drained");
                        self.stop_with(StopReason::Eof, None, &mut submitted);
                        eof = false;
                    }
                    let code = self.sink.last_error();
                    if code != 0 {
                        self.stop_with(StopReason::Error, Some(code), &mut submitted);
                    }
                }
            }
        }
    }

    fn current_state(&self) -> PlaybackState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: PlaybackState) {
        *self.state.lock().unwrap() = next;
    }

    fn handle_play(&mut self) -> Result<(), PlayerError> {
        if self.current_state() == PlaybackState::Playing {
            return Ok(());
        }
        match self.sink.start() {
            Ok(()) => {
                self.set_state(PlaybackState::Playing);
                Ok(())
            }
            Err(err) => {
                self.last_error
                    .store(self.sink.last_error(), Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Transition to `Stopped`, emitting exactly one notification when the
    /// prior state was active.
    fn stop_with(&mut self, reason: StopReason, code: Option<i32>, submitted: &mut u64) {
        let was_active = {
            let mut state = self.state.lock().unwrap();
            let active = *state != PlaybackState::Stopped;
            *state = PlaybackState::Stopped;
            active
        };
        self.sink.halt();
        *submitted = 0;
        if let Some(code) = code {
            self.last_error.store(code, Ordering::Relaxed);
        }
        if was_active {
            let _ = self.event_tx.send(StoppedEvent {
                reason,
                error_code: code,
            });
        }
    }

    /// Top up the device buffer rotation, at most one full rotation per tick.
    fn refill(&mut self, buf: &mut [u8], submitted: &mut u64, eof: &mut bool) -> Result<(), i32> {
        for _ in 0..DEVICE_BUFFER_COUNT {
            if *eof {
                return Ok(());
            }
            let in_flight = submitted.saturating_sub(self.sink.processed_buffers());
            if in_flight >= DEVICE_BUFFER_COUNT as u64 {
                return Ok(());
            }

            let filled = self.fill_buffer(buf)?;
            if filled == 0 {
                *eof = true;
                return Ok(());
            }
            if self.sink.enqueue(&buf[..filled]).is_err() {
                return Err(self.sink.last_error());
            }
            *submitted += 1;
        }
        Ok(())
    }

    /// Read from the chain until `buf` is full or the source ends.
    fn fill_buffer(&mut self, buf: &mut [u8]) -> Result<usize, i32> {
        let block = usize::from(self.chain_format.block_align);
        let mut filled = 0;
        while filled < buf.len() {
            match self.chain.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) => {
                    tracing::warn!(error = %err, "chain read failed");
                    return Err(self.sink.last_error());
                }
            }
        }
        Ok(filled - filled % block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wave_types::AudioEncoding;

    #[derive(Default)]
    struct SinkState {
        configured: Option<WaveFormat>,
        enqueued: u64,
        started: u32,
        suspended: u32,
        halted: u32,
        float32: bool,
        fail_enqueue: bool,
        last_error: i32,
    }

    struct MockSink {
        state: Arc<Mutex<SinkState>>,
    }

    impl OutputSink for MockSink {
        fn supports_float32(&self) -> bool {
            self.state.lock().unwrap().float32
        }

        fn configure(&mut self, format: &WaveFormat) -> Result<(), PlayerError> {
            self.state.lock().unwrap().configured = Some(*format);
            Ok(())
        }

        fn enqueue(&mut self, _bytes: &[u8]) -> Result<(), PlayerError> {
            let mut st = self.state.lock().unwrap();
            if st.fail_enqueue {
                st.last_error = -9;
                return Err(PlayerError::Device { code: -9 });
            }
            st.enqueued += 1;
            Ok(())
        }

        fn processed_buffers(&mut self) -> u64 {
            // Instant consumption keeps the refill loop progressing.
            self.state.lock().unwrap().enqueued
        }

        fn start(&mut self) -> Result<(), PlayerError> {
            self.state.lock().unwrap().started += 1;
            Ok(())
        }

        fn suspend(&mut self) -> Result<(), PlayerError> {
            self.state.lock().unwrap().suspended += 1;
            Ok(())
        }

        fn halt(&mut self) {
            let mut st = self.state.lock().unwrap();
            st.halted += 1;
            st.enqueued = 0;
        }

        fn last_error(&self) -> i32 {
            self.state.lock().unwrap().last_error
        }
    }

    struct MockOutputBackend {
        state: Arc<Mutex<SinkState>>,
    }

    impl OutputBackend for MockOutputBackend {
        fn open_device(&self) -> Result<Box<dyn OutputSink>, PlayerError> {
            Ok(Box::new(MockSink {
                state: self.state.clone(),
            }))
        }
    }

    struct ToneSource {
        frames_left: usize,
    }

    impl WaveSource for ToneSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlayerError> {
            let frames = (buf.len() / 8).min(self.frames_left);
            for chunk in buf[..frames * 8].chunks_exact_mut(4) {
                chunk.copy_from_slice(&0.25f32.to_le_bytes());
            }
            self.frames_left -= frames;
            Ok(frames * 8)
        }

        fn wave_format(&self) -> WaveFormat {
            WaveFormat::new(44_100, 32, 2, AudioEncoding::IeeeFloat)
        }
    }

    fn engine_with(
        float32: bool,
        fail_enqueue: bool,
    ) -> (PlaybackEngine, Arc<Mutex<SinkState>>) {
        let state = Arc::new(Mutex::new(SinkState {
            float32,
            fail_enqueue,
            ..SinkState::default()
        }));
        let backend = MockOutputBackend {
            state: state.clone(),
        };
        let engine = PlaybackEngine::with_config(
            Box::new(backend),
            PlaybackConfig {
                latency_ms: 1,
                sink_buffer_seconds: 2.0,
            },
        );
        (engine, state)
    }

    fn recv_event(engine: &PlaybackEngine) -> StoppedEvent {
        engine
            .events()
            .recv_timeout(Duration::from_secs(1))
            .expect("expected a stopped notification")
    }

    #[test]
    fn play_reaches_playing_then_signals_eof() {
        let (mut engine, _state) = engine_with(true, false);
        engine
            .initialize(Box::new(ToneSource { frames_left: 2_000 }))
            .unwrap();
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);

        let event = recv_event(&engine);
        assert_eq!(event.reason, StopReason::Eof);
        assert_eq!(event.error_code, None);
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn fresh_engine_is_silent_until_volume_set() {
        let (engine, _state) = engine_with(true, false);
        assert_eq!(engine.volume(), 0.0);
        engine.set_volume(0.5).unwrap();
        assert_eq!(engine.volume(), 0.5);
        assert!(engine.set_volume(1.5).is_err());
        assert_eq!(engine.volume(), 0.5);
    }

    #[test]
    fn stop_emits_exactly_one_notification() {
        let (mut engine, _state) = engine_with(true, false);
        engine
            .initialize(Box::new(ToneSource {
                frames_left: usize::MAX / 16,
            }))
            .unwrap();
        engine.play().unwrap();
        engine.stop().unwrap();

        let event = recv_event(&engine);
        assert_eq!(event.reason, StopReason::Stopped);
        assert_eq!(engine.state(), PlaybackState::Stopped);

        // A second stop must not emit another notification.
        engine.stop().unwrap();
        assert!(
            engine
                .events()
                .recv_timeout(Duration::from_millis(50))
                .is_err()
        );
    }

    #[test]
    fn pause_and_resume_toggle_state() {
        let (mut engine, state) = engine_with(true, false);
        engine
            .initialize(Box::new(ToneSource {
                frames_left: usize::MAX / 16,
            }))
            .unwrap();
        engine.play().unwrap();
        engine.pause().unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        assert!(state.lock().unwrap().suspended >= 1);

        engine.resume().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        engine.stop().unwrap();
    }

    #[test]
    fn reinitialize_starts_a_clean_session() {
        let (mut engine, state) = engine_with(true, false);
        engine
            .initialize(Box::new(ToneSource {
                frames_left: usize::MAX / 16,
            }))
            .unwrap();
        engine.play().unwrap();
        engine.stop().unwrap();
        let _ = recv_event(&engine);

        engine
            .initialize(Box::new(ToneSource { frames_left: 500 }))
            .unwrap();
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);

        let event = recv_event(&engine);
        assert_eq!(event.reason, StopReason::Eof);
        assert_eq!(state.lock().unwrap().enqueued, 0);
    }

    #[test]
    fn play_without_initialize_fails() {
        let (mut engine, _state) = engine_with(true, false);
        assert!(matches!(
            engine.play(),
            Err(PlayerError::Initialization(_))
        ));
    }

    #[test]
    fn bit_depth_capped_without_float32_device() {
        let (mut engine, state) = engine_with(false, false);
        engine
            .initialize(Box::new(ToneSource { frames_left: 100 }))
            .unwrap();
        let configured = state.lock().unwrap().configured.unwrap();
        assert_eq!(configured.bits_per_sample, 16);
        assert_eq!(configured.encoding, AudioEncoding::Pcm);
    }

    #[test]
    fn float32_device_keeps_float_output() {
        let (mut engine, state) = engine_with(true, false);
        engine
            .initialize(Box::new(ToneSource { frames_left: 100 }))
            .unwrap();
        let configured = state.lock().unwrap().configured.unwrap();
        assert_eq!(configured.bits_per_sample, 32);
        assert_eq!(configured.encoding, AudioEncoding::IeeeFloat);
    }

    #[test]
    fn enqueue_failure_surfaces_error_event_and_code() {
        let (mut engine, _state) = engine_with(true, true);
        engine
            .initialize(Box::new(ToneSource { frames_left: 2_000 }))
            .unwrap();
        engine.play().unwrap();

        let event = recv_event(&engine);
        assert_eq!(event.reason, StopReason::Error);
        assert_eq!(event.error_code, Some(-9));
        assert_eq!(engine.last_error(), -9);
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_transport() {
        let (mut engine, _state) = engine_with(true, false);
        engine
            .initialize(Box::new(ToneSource { frames_left: 100 }))
            .unwrap();
        engine.dispose();
        engine.dispose();
        assert!(matches!(engine.play(), Err(PlayerError::Disposed(_))));
        assert!(matches!(engine.stop(), Err(PlayerError::Disposed(_))));
    }

    #[test]
    fn latency_change_is_validated() {
        let (mut engine, _state) = engine_with(true, false);
        assert_eq!(engine.latency(), 1);
        engine.set_latency(50).unwrap();
        assert_eq!(engine.latency(), 50);
        assert!(engine.set_latency(0).is_err());
    }
}
