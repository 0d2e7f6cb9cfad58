//! Default configuration constants for voicelink.
//!
//! Shared across config types and the engine so tuning values live in one
//! place.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard rate for speech recognition and keeps the outbound
/// PCM stream small without hurting transcription quality.
pub const SAMPLE_RATE: u32 = 16000;

/// Default outbound chunk interval in milliseconds.
///
/// While actively recording, one chunk of `sample_rate * interval / 1000`
/// samples is drained from the buffer and transmitted per interval.
pub const CHUNK_INTERVAL_MS: u32 = 250;

/// Chunk interval floor while the session is sleeping, in milliseconds.
///
/// Sleeping slows transmission to `max(4 * chunk_interval, this)` without
/// stopping it entirely.
pub const SLEEP_INTERVAL_FLOOR_MS: u32 = 1000;

/// Default silence threshold on the smoothed RMS energy (0.0 to 1.0).
///
/// Smoothed energy at or above this counts as speech. Tuned for typical
/// microphone input levels.
pub const SILENCE_THRESHOLD: f32 = 0.005;

/// Number of recent RMS samples averaged into the smoothed energy value.
pub const ENERGY_WINDOW: usize = 10;

/// Sustained silence, in milliseconds, before an idle session goes to sleep.
///
/// Only applies when no speech has been seen since the last commit; a buffer
/// holding speech auto-commits instead of sleeping.
pub const WAKE_TIMEOUT_MS: u32 = 1000;

/// Default silence duration, in milliseconds, after which a buffer that
/// contains speech is committed automatically. Zero disables auto-commit.
pub const AUTO_COMMIT_DELAY_MS: u32 = 1500;

/// How long to wait for a terminal response after a commit, in milliseconds.
///
/// Zero disables the timeout; the session then stays in Processing until the
/// connection drops.
pub const RESPONSE_TIMEOUT_MS: u32 = 30_000;

/// Number of visualization buckets computed per captured frame.
pub const LEVEL_BUCKETS: usize = 50;

/// Display range ceiling for visualization bucket values.
pub const LEVEL_SCALE: f32 = 100.0;

/// Default WebSocket endpoint of the transcription service.
pub const SERVER_URL: &str = "ws://127.0.0.1:8765/realtime";

/// Poll interval of the capture thread, in milliseconds (~60Hz).
pub const CAPTURE_POLL_MS: u64 = 16;
