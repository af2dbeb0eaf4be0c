//! Relay server binary.
//!
//! ```bash
//! qumbed-relay --config relay.toml
//! qumbed-relay --bind 0.0.0.0:6121
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use qumbed_relay::{Config, RelayEngine};
use qumbed_transport::DevIdentity;

/// Zero-knowledge pub/sub relay.
#[derive(Parser, Debug)]
#[command(name = "qumbed-relay", version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file).
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    let engine = Arc::new(RelayEngine::new());
    let server = engine
        .listen(
            &config.server.bind_address,
            &DevIdentity,
            config.server.idle_timeout(),
        )
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("relay shutting down");
    server.close();
    Ok(())
}
