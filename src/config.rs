use crate::defaults;
use crate::error::{Result, VoicelinkError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub vad: VadSettings,
}

/// Remote transcription service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket endpoint, e.g. ws://127.0.0.1:8765/realtime
    pub url: String,
    /// How long to wait for a terminal response after a commit (ms).
    /// Zero disables the timeout.
    pub response_timeout_ms: u32,
}

/// Audio capture and chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Outbound chunk cadence while actively recording (ms).
    pub chunk_interval_ms: u32,
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSettings {
    /// Smoothed-RMS threshold separating speech from silence (0.0 to 1.0).
    pub silence_threshold: f32,
    /// Sustained silence before an idle session goes to sleep (ms).
    pub wake_timeout_ms: u32,
    /// Silence after speech before an automatic commit (ms, 0 disables).
    pub auto_commit_delay_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: defaults::SERVER_URL.to_string(),
            response_timeout_ms: defaults::RESPONSE_TIMEOUT_MS,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            chunk_interval_ms: defaults::CHUNK_INTERVAL_MS,
        }
    }
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            wake_timeout_ms: defaults::WAKE_TIMEOUT_MS,
            auto_commit_delay_ms: defaults::AUTO_COMMIT_DELAY_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoicelinkError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VoicelinkError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if it doesn't exist
    ///
    /// Invalid TOML is still an error; only a missing file falls back.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(VoicelinkError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(VoicelinkError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.audio.chunk_interval_ms == 0 {
            return Err(VoicelinkError::ConfigInvalidValue {
                key: "audio.chunk_interval_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.vad.silence_threshold) {
            return Err(VoicelinkError::ConfigInvalidValue {
                key: "vad.silence_threshold".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOICELINK_SERVER_URL → server.url
    /// - VOICELINK_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("VOICELINK_SERVER_URL")
            && !url.is_empty()
        {
            self.server.url = url;
        }

        if let Ok(device) = std::env::var("VOICELINK_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voicelink/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicelink")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voicelink_env() {
        remove_env("VOICELINK_SERVER_URL");
        remove_env("VOICELINK_AUDIO_DEVICE");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.server.url, "ws://127.0.0.1:8765/realtime");
        assert_eq!(config.server.response_timeout_ms, 30_000);

        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.chunk_interval_ms, 250);

        assert_eq!(config.vad.silence_threshold, 0.005);
        assert_eq!(config.vad.wake_timeout_ms, 1000);
        assert_eq!(config.vad.auto_commit_delay_ms, 1500);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [server]
            url = "ws://stt.internal:9000/session"
            response_timeout_ms = 10000

            [audio]
            device = "hw:0,0"
            sample_rate = 24000
            chunk_interval_ms = 100

            [vad]
            silence_threshold = 0.01
            wake_timeout_ms = 2000
            auto_commit_delay_ms = 0
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.url, "ws://stt.internal:9000/session");
        assert_eq!(config.server.response_timeout_ms, 10000);
        assert_eq!(config.audio.device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.audio.chunk_interval_ms, 100);
        assert_eq!(config.vad.silence_threshold, 0.01);
        assert_eq!(config.vad.wake_timeout_ms, 2000);
        assert_eq!(config.vad.auto_commit_delay_ms, 0);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [server]
            url = "ws://localhost:4000"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.url, "ws://localhost:4000");
        // Everything else should be defaults
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.vad.silence_threshold, 0.005);
    }

    #[test]
    fn test_env_override_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voicelink_env();

        set_env("VOICELINK_SERVER_URL", "ws://other:1234");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.url, "ws://other:1234");
        assert_eq!(config.audio.device, None); // Not overridden

        clear_voicelink_env();
    }

    #[test]
    fn test_env_override_device() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voicelink_env();

        set_env("VOICELINK_AUDIO_DEVICE", "pulse");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.device, Some("pulse".to_string()));

        clear_voicelink_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voicelink_env();

        set_env("VOICELINK_SERVER_URL", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.url, "ws://127.0.0.1:8765/realtime");

        clear_voicelink_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [audio
            device = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());

        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sample_rate() {
        let mut config = Config::default();
        config.audio.sample_rate = 0;
        assert!(matches!(
            config.validate(),
            Err(VoicelinkError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.vad.silence_threshold = 1.5;
        assert!(config.validate().is_err());

        config.vad.silence_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("voicelink"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_voicelink_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_propagates_invalid_toml() {
        let invalid_toml = r#"
            [audio
            device = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }
}
