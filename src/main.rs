use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wshub::{api, config, Config, Error};

#[derive(Parser)]
#[command(name = "wshub", about = "WebSocket pub/sub hub", version)]
struct Cli {
    /// Path to wshub.toml (searched upward from the current directory when
    /// omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Verbose hub lifecycle logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wshub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config_from_path(path)?,
        None => match config::load_config() {
            Ok(config) => config,
            // No file anywhere up the tree: run on the defaults.
            Err(Error::ConfigNotFound) => Config::default(),
            // A file that exists but fails to load is a real error.
            Err(err) => return Err(err.into()),
        },
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.debug {
        config.hub.debug = true;
    }

    api::run_server(config).await?;

    Ok(())
}
