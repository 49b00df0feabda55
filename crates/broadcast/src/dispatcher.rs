//! Broadcast Dispatcher
//!
//! Each endpoint gets its own task: connect, write, flush, close, all under
//! one timeout. Tasks share nothing but the payload bytes, so a dead
//! endpoint cannot delay or fail the others.

use crate::message::OutboundMessage;
use crate::DeliveryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A collection endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Outcome of one delivery attempt
#[derive(Debug)]
pub struct DeliveryReport {
    pub endpoint: Endpoint,
    pub result: Result<(), DeliveryError>,
}

/// Delivery tasks started by one broadcast.
///
/// Dropping the handle detaches the tasks; they still run to completion and
/// log their own failures.
#[derive(Debug)]
pub struct BroadcastHandle {
    tasks: Vec<JoinHandle<DeliveryReport>>,
}

impl BroadcastHandle {
    /// Number of endpoints targeted
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every delivery and collect the reports in endpoint order
    pub async fn join(self) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Delivery task failed: {}", e),
            }
        }
        reports
    }
}

/// Fans a message out to a fixed, ordered endpoint list
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    endpoints: Arc<[Endpoint]>,
    timeout: Duration,
}

impl BroadcastDispatcher {
    /// Create a dispatcher. `timeout` bounds each endpoint's whole attempt.
    pub fn new(endpoints: Vec<Endpoint>, timeout: Duration) -> Self {
        Self {
            endpoints: endpoints.into(),
            timeout,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Start one delivery task per endpoint and return without waiting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn broadcast(&self, message: &OutboundMessage) -> BroadcastHandle {
        let payload: Arc<[u8]> = message.to_string().into_bytes().into();

        let tasks = self
            .endpoints
            .iter()
            .cloned()
            .map(|endpoint| {
                let payload = Arc::clone(&payload);
                let timeout = self.timeout;

                tokio::spawn(async move {
                    let result = deliver(&endpoint, &payload, timeout).await;
                    match &result {
                        Ok(()) => {
                            debug!("Delivered {} bytes to {}", payload.len(), endpoint);
                            metrics::counter!("broadcast_deliveries_total", "outcome" => "delivered")
                                .increment(1);
                        }
                        Err(e) => {
                            warn!("Delivery failed: {}", e);
                            metrics::counter!("broadcast_deliveries_total", "outcome" => "failed")
                                .increment(1);
                        }
                    }
                    DeliveryReport { endpoint, result }
                })
            })
            .collect();

        BroadcastHandle { tasks }
    }
}

async fn deliver(endpoint: &Endpoint, payload: &[u8], timeout: Duration) -> Result<(), DeliveryError> {
    let attempt = async {
        let mut stream = TcpStream::connect((endpoint.address.as_str(), endpoint.port))
            .await
            .map_err(|e| DeliveryError::Connect(endpoint.clone(), e))?;

        let write = async {
            stream.write_all(payload).await?;
            stream.flush().await?;
            stream.shutdown().await
        };
        write.await.map_err(|e| DeliveryError::Write(endpoint.clone(), e))
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| DeliveryError::Timeout(endpoint.clone(), timeout.as_millis() as u64))?
}
