//! PilotLink server binary
//!
//! Accepts agent connections and keeps them registered until shutdown.
//! Machine state lives in memory and events go to the log.

use anyhow::{Context, Result};
use clap::Parser;
use pilotlink::{AgentListener, LogEventSink, MemoryMachineStore, ServerConfig, Services};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pilotlink-server")]
#[command(about = "Agent endpoint for PilotLink fleet management")]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!(
        listen = %config.listen_addr,
        call_timeout = ?config.call_timeout(),
        duplicates = ?config.duplicate_identity,
        "Starting PilotLink server"
    );

    let services = Services::new(Arc::new(MemoryMachineStore::new()), Arc::new(LogEventSink));
    let listener = AgentListener::bind(config, services).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => error!("Could not listen for interrupt: {}", e),
            }
            shutdown.cancel();
        }
    });

    listener.serve(shutdown).await?;
    info!("PilotLink server stopped");
    Ok(())
}
