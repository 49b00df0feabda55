//! Telemetry Collector - receives relay messages and logs them

use anyhow::Context;
use broadcast::Collector;
use relay::{init_logging, init_metrics, RelayConfig};
use tokio::sync::{mpsc, watch};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let config = RelayConfig::load(path.as_deref()).context("failed to load configuration")?;
    init_logging(&config.logging);
    init_metrics(config.metrics_addr.as_deref())?;

    let settings = &config.collector;
    let collector = Collector::bind(&settings.listen, settings.collector_config())
        .await
        .with_context(|| format!("failed to bind {}", settings.listen))?;

    let (tx, mut rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(collector.run(tx, shutdown_rx));

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                info!(
                    client_id = %message.client_id,
                    latitude = message.fix.latitude,
                    longitude = message.fix.longitude,
                    timestamp = %message.fix.timestamp,
                    speed_kmh = message.telemetry.speed_kmh,
                    engine_rpm = message.telemetry.engine_rpm,
                    fuel_level_percent = message.telemetry.fuel_level_percent,
                    "Telemetry received"
                );
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    server.await?;
    Ok(())
}
