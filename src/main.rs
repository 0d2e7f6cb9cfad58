use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voicelink::audio::capture::{list_devices, suppress_audio_warnings};
use voicelink::cli::{Cli, Commands};
use voicelink::config::Config;
use voicelink::defaults;
use voicelink::engine::{EngineEvent, VoiceEngine};

#[tokio::main]
async fn main() -> Result<()> {
    suppress_audio_warnings();
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        None => {
            let config = load_config(&cli)?;
            run(config, cli.quiet, cli.verbose).await?;
        }
    }

    Ok(())
}

fn init_tracing(quiet: bool, verbose: u8) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("voicelink={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file, then layer environment and CLI overrides on top.
fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_default(&path)?.with_env_overrides();

    if let Some(server) = &cli.server {
        config.server.url = server.clone();
    }
    if let Some(device) = &cli.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(sample_rate) = cli.sample_rate {
        config.audio.sample_rate = sample_rate;
    }
    if let Some(chunk_interval) = cli.chunk_interval {
        config.audio.chunk_interval_ms = chunk_interval;
    }
    if let Some(threshold) = cli.threshold {
        config.vad.silence_threshold = threshold;
    }
    if let Some(auto_commit) = cli.auto_commit {
        config.vad.auto_commit_delay_ms = auto_commit;
    }

    config.validate()?;
    Ok(config)
}

fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;
    if devices.is_empty() {
        println!("No audio input devices found");
    } else {
        println!("Available audio input devices:");
        for device in devices {
            println!("  {}", device);
        }
    }
    Ok(())
}

async fn run(config: Config, quiet: bool, verbose: u8) -> Result<()> {
    info!("voicelink {}", voicelink::version_string());

    let mut engine = VoiceEngine::new(config);
    let mut events = engine.subscribe();

    engine.connect().await?;
    engine.start_recording()?;
    if !quiet {
        eprintln!("Recording. Speak, pause to commit, Ctrl-C to stop.");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !quiet {
                    eprintln!();
                }
                break;
            }
            event = events.recv() => match event {
                Ok(EngineEvent::Transcript { text, latency_ms }) => {
                    if verbose >= 1 {
                        // Clear the meter line before printing
                        eprint!("\r{:width$}\r", "", width = defaults::LEVEL_BUCKETS + 12);
                    }
                    println!("{}", text);
                    if let Some(latency) = latency_ms {
                        info!("transcribed in {} ms", latency);
                    }
                }
                Ok(EngineEvent::SessionReady { session }) => {
                    info!(session_id = %session.id, model = ?session.model, "session ready");
                }
                Ok(EngineEvent::Level { levels, .. }) => {
                    if verbose >= 1 && !quiet {
                        eprint!("\r{}", render_meter(&levels));
                    }
                }
                Ok(EngineEvent::StateChanged { .. }) => {}
                Ok(EngineEvent::RemoteError { message }) => {
                    warn!("server error: {}", message);
                }
                Ok(EngineEvent::CaptureError { message }) => {
                    anyhow::bail!("audio capture failed: {}", message);
                }
                Ok(EngineEvent::Disconnected) => {
                    if !quiet {
                        eprintln!("Connection lost");
                    }
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event stream lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    engine.stop_recording();
    let stats = engine.stats();
    engine.disconnect();

    if !quiet {
        eprintln!(
            "Session: {} chunks / {} KiB sent, {} responses, avg latency {} ms",
            stats.chunks_sent,
            stats.bytes_sent / 1024,
            stats.responses,
            stats.avg_latency_ms,
        );
    }
    Ok(())
}

/// Render the input level as a fixed-width bar for stderr.
fn render_meter(levels: &[f32]) -> String {
    const GLYPHS: [char; 8] = [' ', '.', ':', '-', '=', '+', '*', '#'];
    let mut out = String::with_capacity(levels.len() + 2);
    out.push('[');
    for &level in levels {
        let step = defaults::LEVEL_SCALE / (GLYPHS.len() - 1) as f32;
        let idx = ((level / step).round() as usize).min(GLYPHS.len() - 1);
        out.push(GLYPHS[idx]);
    }
    out.push(']');
    out
}
