//! retro-state binary
//!
//! Usage: `retro-state [configuration.yaml]`

use anyhow::{Context, Result};
use retro_state::{init_logging, RetroState, RetroStateConfig};
use tracing::info;

const DEFAULT_CONFIG: &str = "configuration.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = RetroStateConfig::load_file(&path)
        .with_context(|| format!("loading configuration from {path}"))?;

    let retro = RetroState::init(config)?;
    retro.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");
    retro.shutdown().await?;
    Ok(())
}
