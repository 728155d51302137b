//! AI Talkmaster Server - standalone headless server for the AIT
//! conversational orchestration service.
//!
//! This binary wires a YAML configuration file into [`ait_core::bootstrap`]
//! and serves the HTTP surface until it receives a shutdown signal, at
//! which point it drains in-flight work and archives every live session
//! before exiting.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use ait_core::runtime::TokioSpawner;
use ait_core::session::archive;
use ait_core::{bootstrap, spawn_reaper, start_server, Config};

/// AI Talkmaster Server - headless HTTP front end for dialog generation and
/// text-to-speech delivery.
#[derive(Parser, Debug)]
#[command(name = "aitalkmaster-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", default_value = "ait-server.yaml", env = "AIT_CONFIG")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AIT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides the value in the config file).
    #[arg(short = 'p', long, env = "AIT_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new().filter_level(args.log_level).format_timestamp_millis().init();

    log::info!("AI Talkmaster Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    if let Some(port) = args.port {
        config.server.port = port;
    }

    let state = bootstrap(config).await.context("failed to bootstrap ait-core services")?;

    spawn_reaper(&state, &TokioSpawner::current());

    log::info!(
        "Configuration loaded: {} chat models allowed, audio {}",
        state.config.chat_client.allowed_models.len(),
        if state.audio_configured() { "configured" } else { "not configured" }
    );

    let server_state = Arc::clone(&state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_state).await {
            log::error!("server error: {e}");
        }
    });

    log::info!("HTTP server started on {}:{}", state.config.server.host, state.config.server.port);

    shutdown_signal().await;
    log::info!("shutdown signal received, draining in-flight work...");

    server_handle.abort();

    state.message_workers.shutdown();
    state.audio_workers.shutdown();

    for join_key in state.sessions.join_keys() {
        if let Err(e) = archive::reset_join_key(&state.generated_audio_dir, &join_key) {
            log::warn!("shutdown: archiving {join_key} failed: {e}");
        }
    }

    for mount in state.stream_delivery.list_active_mounts().await {
        if let Err(e) = state.stream_delivery.stop_mount(&mount.join_key).await {
            log::warn!("shutdown: stopping mount {} failed: {e}", mount.join_key);
        }
    }

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
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
