//! Vehicle Telemetry Relay
//!
//! Wires the OBD-II poller, a location source and the broadcast dispatcher
//! into one running session.

pub mod config;
mod location;
mod session;

pub use crate::config::{RelayConfig, SessionMode};
pub use location::StaticLocationSource;
pub use session::SessionCoordinator;

use anyhow::Context;
use crate::config::{LogFormat, LoggingConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use obd_protocol::{open_adapter, ObdClient};
use obd_scheduler::{ObdPoller, SnapshotReader};
use std::net::SocketAddr;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.expect("Failed to set tracing subscriber");
}

/// Install the Prometheus exporter if an address is configured
pub fn init_metrics(addr: Option<&str>) -> anyhow::Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics address {addr:?}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    info!("Serving metrics on http://{}/metrics", addr);
    Ok(())
}

/// Open the adapter and spawn the poller.
///
/// Returns `None` in GPS-only mode, and also when the adapter cannot be
/// opened: location messages still go out, with zero telemetry.
async fn start_telemetry(
    config: &RelayConfig,
    shutdown: watch::Receiver<bool>,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Option<SnapshotReader> {
    if config.mode == SessionMode::GpsOnly {
        info!("GPS-only mode, OBD adapter not opened");
        return None;
    }

    let stream = match open_adapter(&config.adapter.path, config.adapter.baud_rate).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(
                "Failed to open OBD adapter {}: {}. Continuing without telemetry",
                config.adapter.path, e
            );
            return None;
        }
    };

    let poller = ObdPoller::new(
        ObdClient::new(stream, config.framing_policy()),
        config.poller_config(),
    );
    let reader = poller.subscribe();
    tasks.push(tokio::spawn(poller.run(shutdown)));
    Some(reader)
}

/// Run the relay until Ctrl-C
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let telemetry = start_telemetry(&config, shutdown_rx.clone(), &mut tasks).await;

    let (fix_tx, fix_rx) = mpsc::channel(16);
    let source = StaticLocationSource::new(&config.location);
    tasks.push(tokio::spawn(source.run(fix_tx, shutdown_rx.clone())));

    let coordinator = SessionCoordinator::new(config.client_id.clone(), telemetry, config.dispatcher());
    tasks.push(tokio::spawn(coordinator.run(fix_rx, shutdown_rx)));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        task.await?;
    }
    Ok(())
}
