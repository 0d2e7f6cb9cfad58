//! Command-line interface for voicelink
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Realtime voice streaming client
#[derive(Parser, Debug)]
#[command(name = "voicelink", version, about = "Stream microphone audio to a realtime transcription service")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: level meter + events, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// WebSocket endpoint of the transcription service
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// Audio input device (e.g., pipewire)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Capture sample rate in Hz
    #[arg(long, value_name = "HZ")]
    pub sample_rate: Option<u32>,

    /// Send cadence while actively recording, in milliseconds
    #[arg(long, value_name = "MS")]
    pub chunk_interval: Option<u32>,

    /// Smoothed-RMS silence threshold (0.0 to 1.0)
    #[arg(long, value_name = "LEVEL")]
    pub threshold: Option<f32>,

    /// Trailing silence before an automatic commit. Examples: 1500ms, 2s, 0 (disable)
    #[arg(long, value_name = "DURATION", value_parser = parse_delay_ms)]
    pub auto_commit: Option<u32>,
}

/// Parse an auto-commit delay string into milliseconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers
/// (milliseconds), single-unit (`500ms`, `2s`), and compound (`1s500ms`).
/// `0` disables automatic commits.
fn parse_delay_ms(s: &str) -> Result<u32, String> {
    let s = s.trim();
    // Bare number → milliseconds
    if let Ok(ms) = s.parse::<u32>() {
        return Ok(ms);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_millis() as u32)
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input devices
    Devices,
}
