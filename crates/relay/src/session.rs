//! Session Coordinator
//!
//! Joins each incoming location fix with the latest telemetry and hands the
//! composed message to the dispatcher.

use broadcast::{BroadcastDispatcher, BroadcastHandle, LocationFix, OutboundMessage};
use obd_scheduler::SnapshotReader;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub struct SessionCoordinator {
    client_id: String,
    /// `None` in GPS-only mode
    telemetry: Option<SnapshotReader>,
    dispatcher: BroadcastDispatcher,
}

impl SessionCoordinator {
    pub fn new(
        client_id: impl Into<String>,
        telemetry: Option<SnapshotReader>,
        dispatcher: BroadcastDispatcher,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            telemetry,
            dispatcher,
        }
    }

    /// Build the message for a fix from the latest committed telemetry
    pub fn compose(&self, fix: LocationFix) -> OutboundMessage {
        let telemetry = self
            .telemetry
            .as_ref()
            .map(SnapshotReader::latest)
            .unwrap_or_default();
        OutboundMessage::new(self.client_id.clone(), fix, telemetry)
    }

    /// Compose and fan out one message
    pub fn publish(&self, fix: LocationFix) -> BroadcastHandle {
        let message = self.compose(fix);
        debug!("Publishing: {}", message);
        self.dispatcher.broadcast(&message)
    }

    /// Publish every fix until the source closes or shutdown is signalled.
    /// Deliveries are detached; their failures are logged by the dispatcher.
    pub async fn run(self, mut fixes: mpsc::Receiver<LocationFix>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Session started for {} ({} endpoints, telemetry {})",
            self.client_id,
            self.dispatcher.endpoints().len(),
            if self.telemetry.is_some() { "on" } else { "off" }
        );

        loop {
            tokio::select! {
                fix = fixes.recv() => match fix {
                    Some(fix) => {
                        self.publish(fix);
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Session stopped");
    }
}
