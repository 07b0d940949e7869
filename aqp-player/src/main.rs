//! AQP Player (aqp-player) - Main entry point
//!
//! Plays one audio file through the buffer queue: resolves configuration,
//! opens the file and the output device, primes the queue, then polls the
//! session until playback ends or a shutdown signal arrives.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use aqp_common::config::{ConfigResolver, ConfigSource, LoggingConfig};
use aqp_player::audio::{CpalDevice, SymphoniaSource};
use aqp_player::{PlayerConfig, QueuePlayer};
use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for aqp-player
#[derive(Parser, Debug)]
#[command(name = "aqp-player")]
#[command(about = "Play an audio file through a fixed ring of output buffers")]
#[command(version)]
struct Args {
    /// Audio file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Configuration file (overrides AQP_CONFIG and the per-user file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds of audio per buffer
    #[arg(long)]
    target_seconds: Option<f64>,

    /// Output gain, 0.0 - 1.0
    #[arg(long)]
    gain: Option<f32>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Print output device names and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration first: it carries the log level
    let (toml_config, config_source) = ConfigResolver::new("aqp")
        .load(args.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&toml_config.logging)?;

    info!(
        "Starting AQP player (git {}, built {}, {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_source {
        ConfigSource::CommandLine(path) => info!("Configuration: {} (--config)", path.display()),
        ConfigSource::Environment(path) => info!("Configuration: {} (AQP_CONFIG)", path.display()),
        ConfigSource::UserConfigDir(path) => info!("Configuration: {}", path.display()),
        ConfigSource::BuiltInDefaults => info!("Configuration: built-in defaults"),
    }

    if args.list_devices {
        for name in CpalDevice::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let file = args.file.context("No audio file given")?;

    let mut config = PlayerConfig::from_playback(&toml_config.playback);
    if let Some(target_seconds) = args.target_seconds {
        config = config.with_target_seconds(target_seconds);
    }
    if let Some(gain) = args.gain {
        config = config.with_gain(gain);
    }
    if args.device.is_some() {
        config = config.with_device(args.device);
    }
    config.validate().context("Invalid playback configuration")?;

    // Opening probes and pre-scans the file; keep it off the runtime threads
    let identifier = file.to_string_lossy().into_owned();
    let open_config = config.clone();
    let player = tokio::task::spawn_blocking(move || {
        let device = CpalDevice::open(open_config.device.as_deref())?
            .with_queue_depth(open_config.buffer_count);
        QueuePlayer::open::<SymphoniaSource>(&identifier, &device, &open_config)
    })
    .await
    .context("Player setup task failed")?
    .with_context(|| format!("Failed to open {}", file.display()))?;

    let format = player.format();
    let sizing = player.sizing();
    info!(
        "Playing {}: {} Hz, {} channels, {} byte buffers, {} packets per refill",
        file.display(),
        format.sample_rate,
        format.channels_per_frame,
        sizing.buffer_size,
        sizing.packets_to_read
    );

    let event_log = spawn_event_logger(&player);
    let played = run(&player, &config).await;

    let stats = player.stats();
    info!(
        "Session finished: {} packets, {} bytes, {} refills, {} underrun warnings",
        stats.packets_read, stats.bytes_read, stats.refills, stats.underrun_warnings
    );

    let cleaned = player.cleanup().context("Failed to release playback resources");
    event_log.abort();

    played?;
    cleaned?;
    if let Some(err) = player.take_error() {
        return Err(err).context("Playback failed");
    }

    info!("Playback complete");
    Ok(())
}

/// Start playback and poll until it ends or a shutdown signal arrives
async fn run(player: &QueuePlayer, config: &PlayerConfig) -> Result<()> {
    player.start().context("Failed to start playback")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                player.stop().context("Failed to stop playback")?;
                break;
            }
            _ = ticker.tick() => {
                if !player.is_running() {
                    break;
                }
            }
        }
    }

    // Let in-flight buffers finish
    let waiter = player.clone();
    let timeout = config.drain_timeout(&player.format(), &player.sizing());
    debug!("Waiting up to {:?} for the output to drain", timeout);
    let drained = tokio::task::spawn_blocking(move || waiter.wait_until_stopped(timeout))
        .await
        .context("Drain wait task failed")?;
    if !drained {
        warn!("Output did not drain within {:?}", timeout);
    }
    Ok(())
}

/// Log session events at debug level until the session goes away
fn spawn_event_logger(player: &QueuePlayer) -> tokio::task::JoinHandle<()> {
    let mut events = player.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!("Event: {}", json),
                    Err(e) => warn!("Failed to serialize event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Event logger skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Initialize tracing: RUST_LOG wins, otherwise the configured level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let level = logging.level.to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("aqp_player={level},aqp_common={level}")));
    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping playback");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping playback");
        },
    }
}
