//! Main entry point for the FreshChain sensor oracle.

use anyhow::{Context, Result};
use freshchain_oracle::{OracleBuilder, OracleConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting FreshChain Sensor Oracle...");

    let config = OracleConfig::from_env().context("Invalid oracle configuration")?;
    let oracle = OracleBuilder::new(config)
        .build()
        .await
        .context("Failed to start the oracle")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    oracle.run(cancel).await.context("Oracle stopped on a credential failure")?;
    Ok(())
}
