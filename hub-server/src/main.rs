//! Hub Server - standalone LAN conferencing switchboard.
//!
//! Binds the control, video, audio, screen, and file endpoints and routes
//! traffic between participants. Carries no media codec, capture, or UI
//! logic; those live in the participant application, out of scope here.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;

/// Hub Server - headless LAN conferencing switchboard.
#[derive(Parser, Debug)]
#[command(name = "hubserver")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "HUB_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Address to bind all sockets to (overrides config file).
    #[arg(short = 'b', long, env = "HUB_BIND_HOST")]
    bind_host: Option<String>,

    /// Control session port (overrides config file).
    #[arg(long, env = "HUB_CONTROL_PORT")]
    control_port: Option<u16>,

    /// Maximum simultaneous participants (overrides config file).
    #[arg(long, env = "HUB_MAX_USERS")]
    max_users: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Hub Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(bind_host) = args.bind_host {
        config.bind_host = bind_host;
    }
    if let Some(control_port) = args.control_port {
        config.control_port = control_port;
    }
    if let Some(max_users) = args.max_users {
        config.max_users = max_users;
    }

    let core_config = config.to_core_config();
    core_config
        .validate()
        .map_err(|msg| anyhow::anyhow!(msg))
        .context("Invalid configuration")?;

    let hub = hub_core::Hub::bootstrap(&core_config)
        .await
        .context("Failed to bootstrap hub")?;

    log::info!(
        "Hub bound on {}: control={}, video={}, audio={}, screen-control={}, screen-data={}, file={}",
        core_config.bind_host,
        core_config.control_port,
        core_config.video_port,
        core_config.audio_port,
        core_config.screen_control_port,
        core_config.screen_data_port,
        core_config.file_port,
    );

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    hub.shutdown().await;

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
