use anyhow::Result;
use clap::Parser;
use commvault_exporter::{
    config::Settings,
    server::{start_server, AppState},
    token_cache::TokenCache,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Commvault Exporter - multi-target Prometheus probe exporter for Commvault
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let settings = Settings::load(args.config.as_deref())?;

    // Initialize logging
    init_logging(&settings.exporter.log_level)?;

    info!("Starting Commvault Exporter");
    info!("Configured targets: {}", settings.targets.len());
    info!("Listen address: {}", settings.exporter.listen_address);

    if settings.targets.is_empty() {
        warn!("No targets defined in configuration; /probe requests will fail to find targets");
    }

    let listen_address = settings.exporter.listen_address.clone();
    let state = AppState {
        settings: Arc::new(settings),
        token_cache: Arc::new(TokenCache::new()),
    };

    // Start HTTP server
    info!("Starting HTTP server...");
    if let Err(e) = start_server(&listen_address, state).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Initialize structured logging with tracing.
fn init_logging(log_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
