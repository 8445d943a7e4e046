//! VoxBridge Server - standalone headless transcription bridge.
//!
//! Accepts telephony provider media streams over WebSocket, transcribes
//! them in near-real-time, and pushes transcripts to browser subscribers
//! and the downstream analysis pipeline. Designed to run as a background
//! daemon.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use voxbridge_core::{bootstrap_services, start_server, AppState};

use crate::config::ServerConfig;

/// VoxBridge Server - telephony-to-AI transcription bridge.
#[derive(Parser, Debug)]
#[command(name = "voxbridge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "VOXBRIDGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "VOXBRIDGE_BIND_PORT")]
    port: Option<u16>,

    /// Transcription language (BCP-47 short form, overrides config file).
    #[arg(short = 'l', long, env = "VOXBRIDGE_LANGUAGE")]
    language: Option<String>,

    /// Directory for paired WAV recordings.
    #[arg(short = 'r', long, env = "VOXBRIDGE_RECORDINGS_DIR")]
    recordings_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("VoxBridge Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(language) = args.language {
        config.core.stt.language = language;
    }
    if let Some(recordings_dir) = args.recordings_dir {
        config.core.recording.dir = recordings_dir;
    }

    log::info!(
        "Configuration: bind_port={}, media_path={}, backend={:?}, language={}",
        config.bind_port,
        config.core.media_path,
        config.core.stt.backend,
        config.core.stt.language
    );

    // Bootstrap services (fatal on configuration errors)
    let core_config = config.into_core_config();
    let services = bootstrap_services(core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    // Start background tasks (idle-session sweeper)
    services.start_background_tasks();

    // Build app state for the HTTP server
    let app_state = AppState::new(
        std::sync::Arc::clone(&services.registry),
        std::sync::Arc::clone(&services.config),
    );

    // Spawn the HTTP server on the main runtime
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: sessions closed, subscribers notified
    services.shutdown().await;

    // Abort the server task (nothing left to serve)
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
