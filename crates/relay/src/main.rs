//! Vehicle Telemetry Relay - Main Entry Point

use anyhow::Context;
use relay::{init_logging, init_metrics, run, RelayConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let config = RelayConfig::load(path.as_deref()).context("failed to load configuration")?;
    init_logging(&config.logging);

    info!("=== OBD Relay v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Client {} in {:?} mode, {} endpoints",
        config.client_id,
        config.mode,
        config.endpoints.len()
    );

    init_metrics(config.metrics_addr.as_deref())?;
    run(config).await
}
