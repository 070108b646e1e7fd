//! Pigeon content server entry point.

mod app;
mod config;
mod handler;
mod session;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Chunked content upload and download over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "pigeon-content-server", version)]
#[command(about = "Pigeon content server", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/pigeon/content-server.toml).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting Pigeon content server"
    );

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::info!(
        port = config.port,
        storage_root = %config.storage_root.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("content server shut down cleanly");
    Ok(())
}
