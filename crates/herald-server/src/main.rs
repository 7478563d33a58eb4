//! # Herald Server
//!
//! Realtime broadcast relay with private and presence channels.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! herald
//!
//! # Run with custom config
//! herald --config /path/to/herald.toml
//!
//! # Run with environment variables
//! HERALD_PORT=6001 HERALD_HOST=0.0.0.0 herald
//! ```

mod adapter;
mod api;
mod app;
mod auth;
mod config;
mod handlers;
mod metrics;
mod store;
mod subscribers;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "herald", version, about = "Realtime broadcast relay")]
struct Cli {
    /// Configuration file. Defaults to the first of herald.toml,
    /// /etc/herald/herald.toml and ~/.config/herald/herald.toml.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load(cli.config.as_deref())?;

    // Initialize tracing
    let default_filter = if config.dev_mode {
        "herald=debug,tower_http=debug"
    } else {
        "herald=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.dev_mode {
        tracing::warn!("Starting server in dev mode");
    }
    tracing::info!("Starting Herald server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    app::run_server(config).await?;

    Ok(())
}
