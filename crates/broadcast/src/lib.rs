//! Telemetry Broadcast
//!
//! Plaintext location + telemetry messages fanned out over TCP:
//! - One connection per message per endpoint, closed after the write
//! - Per-endpoint failure isolation, at-most-once delivery
//! - A receiving collector for the same wire format

mod collector;
mod dispatcher;
mod message;

pub use collector::{Collector, CollectorConfig};
pub use dispatcher::{BroadcastDispatcher, BroadcastHandle, DeliveryReport, Endpoint};
pub use message::{is_valid_client_id, LocationFix, OutboundMessage, TIMESTAMP_FORMAT};

use thiserror::Error;

/// Per-endpoint delivery failure
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Connection to {0} failed: {1}")]
    Connect(Endpoint, std::io::Error),

    #[error("Write to {0} failed: {1}")]
    Write(Endpoint, std::io::Error),

    #[error("Delivery to {0} timed out after {1}ms")]
    Timeout(Endpoint, u64),
}

/// Malformed inbound message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageParseError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field} value: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}
