//! Static location source
//!
//! Emits a configured position on a fixed interval. Stands in for a real
//! positioning collaborator, which only needs to feed the same channel.

use crate::config::LocationConfig;
use broadcast::LocationFix;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::info;

pub struct StaticLocationSource {
    latitude: f64,
    longitude: f64,
    interval: Duration,
}

impl StaticLocationSource {
    pub fn new(config: &LocationConfig) -> Self {
        Self {
            latitude: config.latitude,
            longitude: config.longitude,
            interval: Duration::from_millis(config.interval_ms),
        }
    }

    /// Send a fix every interval, starting after the first one elapses
    pub async fn run(self, tx: mpsc::Sender<LocationFix>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Static location source at ({}, {}) every {:?}",
            self.latitude, self.longitude, self.interval
        );

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let fix = LocationFix::new(self.latitude, self.longitude, Utc::now());
                    if tx.send(fix).await.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
