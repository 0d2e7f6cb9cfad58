//! Session engine: owns the capture thread, the voice activity detector,
//! the local PCM buffer and the protocol client, and exposes the command
//! surface (connect, record, commit, clear) plus an event stream.

use crate::audio::capture::CpalCaptureSource;
use crate::audio::frame;
use crate::audio::source::{CaptureConfig, CaptureSource};
use crate::audio::vad::{Clock, SystemClock, Vad, VadConfig, VadSignal};
use crate::buffer::{self, PcmBuffer};
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, VoicelinkError};
use crate::protocol::client::{self, ClientHandle, ProtocolShared};
use crate::protocol::messages::{ClientEvent, RemoteSession};
use crate::session::{SessionState, SharedState};
use crate::stats::{StatsSnapshot, Telemetry};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Give up on a capture source after this many consecutive read failures.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 5;

/// Notifications published by the engine to its subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged { state: SessionState },
    /// The server completed its session handshake.
    SessionReady { session: RemoteSession },
    /// Per-frame input levels for a waveform display: mean absolute
    /// amplitude per segment, scaled into the display range.
    Level { rms: f32, levels: Vec<f32> },
    /// A transcription arrived, with commit-to-response latency when known.
    Transcript {
        text: String,
        latency_ms: Option<u64>,
    },
    RemoteError { message: String },
    CaptureError { message: String },
    Disconnected,
}

/// Result of a user-issued command, suitable for direct display.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }

    fn failed(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
        }
    }
}

/// State shared across the capture thread, the pacing task and the
/// protocol driver.
#[derive(Clone)]
struct Shared {
    state: Arc<SharedState>,
    stats: Arc<Telemetry>,
    pending: Arc<Mutex<Option<Instant>>>,
    buffer: Arc<Mutex<PcmBuffer>>,
    /// Samples captured since the last commit or clear, to detect
    /// commits with nothing to transcribe.
    uncommitted: Arc<AtomicUsize>,
    /// Identity from session.created, held until the connection drops.
    remote_session: Arc<Mutex<Option<RemoteSession>>>,
    vad: Arc<Mutex<Vad<Arc<dyn Clock>>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl Shared {
    fn emit_state(&self, state: SessionState) {
        let _ = self.events.send(EngineEvent::StateChanged { state });
    }
}

struct CaptureWorker {
    stop: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

/// The streaming voice client.
pub struct VoiceEngine {
    config: Config,
    shared: Shared,
    client: Option<ClientHandle>,
    /// Shutdown flag of the current connection's driver task.
    client_shutdown: Option<Arc<AtomicBool>>,
    capture: Option<CaptureWorker>,
    pacing: Option<tokio::task::JoinHandle<()>>,
}

impl VoiceEngine {
    pub fn new(config: Config) -> Self {
        let (events, _) = broadcast::channel(256);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let vad_config = VadConfig {
            silence_threshold: config.vad.silence_threshold,
            energy_window: defaults::ENERGY_WINDOW,
            wake_timeout_ms: config.vad.wake_timeout_ms,
            auto_commit_delay_ms: config.vad.auto_commit_delay_ms,
        };
        Self {
            config,
            shared: Shared {
                state: Arc::new(SharedState::new()),
                stats: Arc::new(Telemetry::new()),
                pending: Arc::new(Mutex::new(None)),
                buffer: Arc::new(Mutex::new(PcmBuffer::new())),
                uncommitted: Arc::new(AtomicUsize::new(0)),
                remote_session: Arc::new(Mutex::new(None)),
                vad: Arc::new(Mutex::new(Vad::new(vad_config, clock))),
                events,
            },
            client: None,
            client_shutdown: None,
            capture: None,
            pacing: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    /// Identity of the server-side session, from session.created.
    /// `None` before the handshake and after a disconnect.
    pub fn session(&self) -> Option<RemoteSession> {
        self.shared
            .remote_session
            .lock()
            .ok()
            .and_then(|session| (*session).clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let buffered = self
            .shared
            .buffer
            .lock()
            .map(|b| b.len())
            .unwrap_or_default();
        self.shared
            .stats
            .snapshot(buffered, self.config.audio.sample_rate)
    }

    /// Replace the configuration. Only allowed while disconnected, so a
    /// running session never sees settings change under it.
    pub fn update_config(&mut self, config: Config) -> Result<()> {
        let state = self.state();
        if state != SessionState::Disconnected {
            return Err(VoicelinkError::InvalidState {
                operation: "update_config".to_string(),
                state: state.as_str().to_string(),
            });
        }
        config.validate()?;
        let vad_config = VadConfig {
            silence_threshold: config.vad.silence_threshold,
            energy_window: defaults::ENERGY_WINDOW,
            wake_timeout_ms: config.vad.wake_timeout_ms,
            auto_commit_delay_ms: config.vad.auto_commit_delay_ms,
        };
        if let Ok(mut vad) = self.shared.vad.lock() {
            *vad = Vad::new(vad_config, Arc::new(SystemClock) as Arc<dyn Clock>);
        }
        self.config = config;
        Ok(())
    }

    /// Open the WebSocket connection. The session becomes Connected once
    /// the socket is up; `SessionReady` follows when the server completes
    /// its handshake.
    pub async fn connect(&mut self) -> Result<()> {
        let state = self.state();
        if state != SessionState::Disconnected {
            return Err(VoicelinkError::InvalidState {
                operation: "connect".to_string(),
                state: state.as_str().to_string(),
            });
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shared = ProtocolShared {
            state: Arc::clone(&self.shared.state),
            stats: Arc::clone(&self.shared.stats),
            pending: Arc::clone(&self.shared.pending),
            session: Arc::clone(&self.shared.remote_session),
            shutdown: Arc::clone(&shutdown),
            events: self.shared.events.clone(),
        };
        let handle = client::connect(&self.config.server.url, shared).await?;
        self.client = Some(handle);
        self.client_shutdown = Some(shutdown);
        self.shared.emit_state(SessionState::Connected);
        info!(url = %self.config.server.url, "connected");
        Ok(())
    }

    /// Tear the session down. Safe to call in any state; the session is
    /// Disconnected as soon as this returns, so a reconnect can follow
    /// immediately.
    pub fn disconnect(&mut self) {
        self.halt_workers();
        // Silence the driver before dropping the handle: it still sends a
        // close frame, but must not stomp the state of a later connection
        if let Some(shutdown) = self.client_shutdown.take() {
            shutdown.store(true, Ordering::Relaxed);
        }
        let had_client = self.client.take().is_some();
        self.shared.state.set(SessionState::Disconnected);
        if let Ok(mut session) = self.shared.remote_session.lock() {
            session.take();
        }
        if had_client {
            let _ = self.shared.events.send(EngineEvent::Disconnected);
        }
        debug!("disconnect requested");
    }

    /// Start streaming from the default or configured microphone.
    pub fn start_recording(&mut self) -> Result<()> {
        let capture_config = CaptureConfig {
            device: self.config.audio.device.clone(),
            sample_rate: self.config.audio.sample_rate,
        };
        let source = Box::new(CpalCaptureSource::new(&capture_config)?);
        self.start_recording_with_source(source)
    }

    /// Start streaming from an arbitrary capture source.
    pub fn start_recording_with_source(
        &mut self,
        mut source: Box<dyn CaptureSource>,
    ) -> Result<()> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(VoicelinkError::InvalidState {
                operation: "start_recording".to_string(),
                state: state.as_str().to_string(),
            });
        }
        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                return Err(VoicelinkError::InvalidState {
                    operation: "start_recording".to_string(),
                    state: state.as_str().to_string(),
                });
            }
        };

        source.start()?;

        if let Ok(mut vad) = self.shared.vad.lock() {
            vad.reset();
        }
        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.clear();
        }
        self.shared.uncommitted.store(0, Ordering::Relaxed);

        self.shared.state.set(SessionState::RecordingActive);
        self.shared.emit_state(SessionState::RecordingActive);
        info!("recording started");

        let stop = Arc::new(AtomicBool::new(false));

        let capture_shared = self.shared.clone();
        let capture_client = client.clone();
        let capture_stop = Arc::clone(&stop);
        let thread = std::thread::spawn(move || {
            run_capture(source, capture_shared, capture_client, capture_stop);
        });
        self.capture = Some(CaptureWorker { stop: Arc::clone(&stop), thread });

        let pacing_shared = self.shared.clone();
        let chunk_interval_ms = self.config.audio.chunk_interval_ms;
        let chunk_len = buffer::chunk_samples(self.config.audio.sample_rate, chunk_interval_ms);
        let response_timeout_ms = self.config.server.response_timeout_ms;
        self.pacing = Some(tokio::spawn(run_pacing(
            pacing_shared,
            client,
            stop,
            chunk_interval_ms,
            chunk_len,
            response_timeout_ms,
        )));

        Ok(())
    }

    /// Stop streaming and return to the Connected state. A transcription
    /// still in flight will deliver its transcript but no longer drives
    /// the session state.
    pub fn stop_recording(&mut self) -> CommandOutcome {
        let Some(worker) = self.capture.take() else {
            warn!("stop_recording while not recording");
            return CommandOutcome::ok("not recording");
        };

        worker.stop.store(true, Ordering::Relaxed);
        if worker.thread.join().is_err() {
            error!("capture thread panicked");
        }
        if let Some(pacing) = self.pacing.take() {
            pacing.abort();
        }

        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.clear();
        }
        self.shared.uncommitted.store(0, Ordering::Relaxed);
        if let Ok(mut vad) = self.shared.vad.lock() {
            vad.reset();
        }

        if self.state() != SessionState::Disconnected {
            self.shared.state.set(SessionState::Connected);
            self.shared.emit_state(SessionState::Connected);
        }
        info!("recording stopped");
        CommandOutcome::ok("recording stopped")
    }

    /// Manually commit everything captured so far.
    pub fn commit(&self) -> CommandOutcome {
        let state = self.state();
        if state == SessionState::Processing {
            warn!("commit while a transcription is in progress");
            return CommandOutcome::failed("transcription already in progress");
        }
        if !state.is_capturing() {
            return CommandOutcome::failed("not recording");
        }
        let Some(client) = &self.client else {
            return CommandOutcome::failed("not connected");
        };

        if self.shared.uncommitted.load(Ordering::Relaxed) == 0 {
            warn!("commit with no captured audio");
            return CommandOutcome::ok("nothing to commit");
        }

        match do_commit(&self.shared, client) {
            Ok(()) => CommandOutcome::ok("committed"),
            Err(e) => CommandOutcome::failed(&e.to_string()),
        }
    }

    /// Discard uncommitted audio, locally and (when not mid-transcription)
    /// on the server.
    pub fn clear_buffer(&self) -> CommandOutcome {
        let state = self.state();
        if !state.is_capturing() {
            return CommandOutcome::failed("not recording");
        }

        if self.shared.uncommitted.load(Ordering::Relaxed) == 0 {
            warn!("clear with no captured audio");
            return CommandOutcome::ok("buffer already empty");
        }

        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.clear();
        }
        self.shared.uncommitted.store(0, Ordering::Relaxed);
        if let Ok(mut vad) = self.shared.vad.lock() {
            vad.clear_speech_seen();
        }

        // While a commit is being transcribed the remote buffer belongs to
        // that response; only reset our side.
        if state != SessionState::Processing {
            if let Some(client) = &self.client
                && let Err(e) = client.send(ClientEvent::Clear)
            {
                return CommandOutcome::failed(&e.to_string());
            }
        }
        CommandOutcome::ok("buffer cleared")
    }

    fn halt_workers(&mut self) {
        if self.capture.is_some() {
            self.stop_recording();
        }
        if let Some(pacing) = self.pacing.take() {
            pacing.abort();
        }
    }
}

impl Drop for VoiceEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.capture.take() {
            worker.stop.store(true, Ordering::Relaxed);
            let _ = worker.thread.join();
        }
        if let Some(pacing) = self.pacing.take() {
            pacing.abort();
        }
    }
}

/// Flush buffered residue, send the commit, and move to Processing.
/// Shared by the manual command and the detector's auto-commit.
fn do_commit(shared: &Shared, client: &ClientHandle) -> Result<()> {
    let residue = match shared.buffer.lock() {
        Ok(mut buffer) => buffer.drain_all(),
        Err(_) => None,
    };
    if let Some(samples) = residue {
        let bytes = (samples.len() * 2) as u64;
        client.send(ClientEvent::append_pcm(&samples))?;
        shared.stats.record_chunk(bytes);
    }

    client.send(ClientEvent::Commit)?;
    if let Ok(mut pending) = shared.pending.lock() {
        *pending = Some(Instant::now());
    }
    shared.uncommitted.store(0, Ordering::Relaxed);
    if shared.state.enter_processing() {
        shared.emit_state(SessionState::Processing);
    }
    if let Ok(mut vad) = shared.vad.lock() {
        vad.clear_speech_seen();
    }
    debug!("commit sent");
    Ok(())
}

/// Capture thread body: poll the source, feed the buffer and the detector,
/// and act on its signals. Capture keeps buffering during Processing; only
/// transmission pauses.
fn run_capture(
    mut source: Box<dyn CaptureSource>,
    shared: Shared,
    client: ClientHandle,
    stop: Arc<AtomicBool>,
) {
    let poll = Duration::from_millis(defaults::CAPTURE_POLL_MS);
    let mut consecutive_errors = 0u32;

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(poll);

        let samples = match source.read_samples() {
            Ok(samples) => {
                consecutive_errors = 0;
                samples
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!("capture read failed ({consecutive_errors}): {e}");
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    error!("capture source failed repeatedly, stopping");
                    let _ = shared.events.send(EngineEvent::CaptureError {
                        message: e.to_string(),
                    });
                    break;
                }
                continue;
            }
        };
        if samples.is_empty() {
            continue;
        }

        // Frames are only accepted while a recording episode is live; after
        // a disconnect the thread keeps polling but must not grow the buffer
        let state = shared.state.get();
        if !state.is_capturing() {
            continue;
        }

        let rms = frame::rms(&samples);
        if let Ok(mut buffer) = shared.buffer.lock() {
            buffer.append_f32(&samples);
        }
        shared.uncommitted.fetch_add(samples.len(), Ordering::Relaxed);

        let report = match shared.vad.lock() {
            Ok(mut vad) => vad.observe(rms, state),
            Err(_) => continue,
        };

        let _ = shared.events.send(EngineEvent::Level {
            rms: report.rms,
            levels: frame::level_buckets(&samples, defaults::LEVEL_BUCKETS, defaults::LEVEL_SCALE),
        });

        match report.signal {
            VadSignal::Sleep => {
                if shared.state.transition(
                    SessionState::RecordingActive,
                    SessionState::RecordingSleeping,
                ) {
                    info!("no speech yet, dropping to sleep cadence");
                    shared.emit_state(SessionState::RecordingSleeping);
                }
            }
            VadSignal::Wake => {
                if shared.state.transition(
                    SessionState::RecordingSleeping,
                    SessionState::RecordingActive,
                ) {
                    info!("speech detected, resuming active cadence");
                    shared.emit_state(SessionState::RecordingActive);
                }
            }
            VadSignal::AutoCommit => {
                info!("trailing silence after speech, committing");
                if let Err(e) = do_commit(&shared, &client) {
                    warn!("auto-commit failed: {e}");
                }
            }
            VadSignal::None => {}
        }
    }

    if let Err(e) = source.stop() {
        warn!("failed to stop capture source: {e}");
    }
    debug!("capture thread exiting");
}

/// Pacing task body: drain one chunk per interval while transmitting, and
/// watch for response timeouts while a transcription is outstanding.
async fn run_pacing(
    shared: Shared,
    client: ClientHandle,
    stop: Arc<AtomicBool>,
    chunk_interval_ms: u32,
    chunk_len: usize,
    response_timeout_ms: u32,
) {
    while !stop.load(Ordering::Relaxed) {
        let state = shared.state.get();
        if state == SessionState::Disconnected {
            break;
        }

        match buffer::pacing_interval(state, chunk_interval_ms) {
            Some(interval) => {
                tokio::time::sleep(interval).await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                // The state may have flipped during the sleep
                if !shared.state.get().is_transmitting() {
                    continue;
                }
                let chunk = match shared.buffer.lock() {
                    Ok(mut buffer) => buffer.drain_chunk(chunk_len),
                    Err(_) => None,
                };
                if let Some(samples) = chunk {
                    let bytes = (samples.len() * 2) as u64;
                    if client.send(ClientEvent::append_pcm(&samples)).is_err() {
                        break;
                    }
                    shared.stats.record_chunk(bytes);
                }
            }
            None => {
                if state == SessionState::Processing && response_timeout_ms > 0 {
                    let timed_out = shared
                        .pending
                        .lock()
                        .ok()
                        .and_then(|p| *p)
                        .is_some_and(|sent_at| {
                            sent_at.elapsed() >= Duration::from_millis(response_timeout_ms as u64)
                        });
                    if timed_out {
                        warn!("no response within {response_timeout_ms} ms, resuming");
                        if let Ok(mut pending) = shared.pending.lock() {
                            pending.take();
                        }
                        if shared.state.transition(
                            SessionState::Processing,
                            SessionState::RecordingActive,
                        ) {
                            shared.emit_state(SessionState::RecordingActive);
                        }
                        let _ = shared.events.send(EngineEvent::RemoteError {
                            message: "transcription response timed out".to_string(),
                        });
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    debug!("pacing task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_new_engine_starts_disconnected() {
        let engine = VoiceEngine::new(test_config());
        assert_eq!(engine.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_recording_requires_connection() {
        let mut engine = VoiceEngine::new(test_config());
        let source = Box::new(crate::audio::source::MockCaptureSource::new());

        let result = engine.start_recording_with_source(source);
        assert!(matches!(
            result,
            Err(VoicelinkError::InvalidState { ref operation, .. }) if operation == "start_recording"
        ));
    }

    #[test]
    fn test_commit_while_not_recording_fails() {
        let engine = VoiceEngine::new(test_config());
        let outcome = engine.commit();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "not recording");
    }

    #[test]
    fn test_clear_while_not_recording_fails() {
        let engine = VoiceEngine::new(test_config());
        let outcome = engine.clear_buffer();
        assert!(!outcome.success);
    }

    #[test]
    fn test_stop_recording_when_idle_is_a_noop() {
        let mut engine = VoiceEngine::new(test_config());
        let outcome = engine.stop_recording();
        assert!(outcome.success);
        assert_eq!(outcome.message, "not recording");
        assert_eq!(engine.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_update_config_allowed_while_disconnected() {
        let mut engine = VoiceEngine::new(test_config());
        let mut config = test_config();
        config.audio.chunk_interval_ms = 100;
        assert!(engine.update_config(config).is_ok());
        assert_eq!(engine.config.audio.chunk_interval_ms, 100);
    }

    #[test]
    fn test_update_config_rejected_while_connected() {
        let mut engine = VoiceEngine::new(test_config());
        engine.shared.state.set(SessionState::Connected);

        let result = engine.update_config(test_config());
        assert!(matches!(
            result,
            Err(VoicelinkError::InvalidState { ref operation, .. }) if operation == "update_config"
        ));
    }

    #[test]
    fn test_update_config_validates() {
        let mut engine = VoiceEngine::new(test_config());
        let mut config = test_config();
        config.audio.sample_rate = 0;
        assert!(engine.update_config(config).is_err());
    }

    #[test]
    fn test_disconnect_returns_state_to_disconnected() {
        let mut engine = VoiceEngine::new(test_config());
        engine.shared.state.set(SessionState::Connected);

        engine.disconnect();
        assert_eq!(engine.state(), SessionState::Disconnected);
        assert!(engine.session().is_none());
    }

    #[test]
    fn test_stats_start_at_zero() {
        let engine = VoiceEngine::new(test_config());
        let stats = engine.stats();
        assert_eq!(stats.chunks_sent, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.buffered_secs, 0.0);
    }
}
