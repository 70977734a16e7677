use clap::Parser;
use meshgate::config::{self, AppContext};
use meshgate::fleet;
use meshgate::overlay::LoopbackOverlay;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Expose internal services under stable overlay-network hostnames
#[derive(Debug, Parser)]
#[command(name = "meshgate", version)]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "proxy.conf")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("meshgate=info".parse().expect("valid log directive")),
        )
        .init();

    // Load the environment file before anything else runs
    dotenvy::dotenv().map_err(|e| {
        error!(error = %e, "Error loading .env file");
        anyhow::anyhow!("Error loading .env file: {}", e)
    })?;

    let cli = Cli::parse();

    let mappings = config::parse_mappings(&cli.config).map_err(|e| {
        error!(path = %cli.config.display(), error = %e, "Failed to load configuration");
        e
    })?;
    info!(
        path = %cli.config.display(),
        count = mappings.len(),
        hostnames = ?mappings.iter().map(|m| m.hostname.as_str()).collect::<Vec<_>>(),
        "Configuration loaded"
    );

    // Resolve process-wide state once; lifecycles only read from it.
    let ctx = AppContext::from_user_config_dir()?;
    let overlay = Arc::new(LoopbackOverlay::new());

    fleet::run_all(ctx, overlay, mappings).await;

    info!("All proxy lifecycles terminated, exiting");
    Ok(())
}
