//! voicelink - realtime voice streaming client
//!
//! Captures microphone audio, detects speech with an energy-based VAD,
//! and streams 16-bit PCM chunks over a JSON WebSocket protocol to a
//! transcription service.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;
pub mod stats;

// Core traits (source → detect → stream)
pub use audio::source::CaptureSource;
pub use audio::vad::{Clock, SystemClock, Vad, VadConfig, VadSignal};

// Engine
pub use engine::{CommandOutcome, EngineEvent, VoiceEngine};

// Error handling
pub use error::{Result, VoicelinkError};

// Config and session state
pub use config::Config;
pub use session::SessionState;

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.2+abc1234"` when git hash is available, `"0.3.2"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_no_whitespace() {
        assert!(!version_string().contains(' '));
    }
}
