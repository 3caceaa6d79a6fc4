//! Uplert sync CLI
//!
//! Command-line interface for the monitoring state-synchronization client.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use uplert_sync::{load_config, Config};

#[derive(Parser)]
#[command(name = "uplert-sync")]
#[command(about = "Realtime monitoring state-synchronization client")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend port (overrides config file)
    #[arg(long)]
    port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!(
        "Starting sync service against {}:{}",
        config.server.host,
        config.server.port
    );

    uplert_sync::run(config).await?;

    Ok(())
}
