//! OBD-II Telemetry Poller
//!
//! Runs the fixed speed -> RPM -> fuel level command cycle against an
//! adapter, paces commands for adapter settle time, and publishes the latest
//! telemetry to concurrent readers.

mod scheduler;

pub use scheduler::{CycleState, ObdPoller, PollerConfig, SnapshotReader};
