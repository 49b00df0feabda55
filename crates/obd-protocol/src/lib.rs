//! OBD-II Protocol Implementation
//!
//! This crate provides async request/response communication with
//! ELM327-compatible OBD-II adapters: command dispatch, prompt-delimited
//! response framing with a bounded retry policy, and Mode 01 field decoding.

mod client;
mod decoder;
mod error;
mod framer;
mod pid;
mod snapshot;

pub use client::{open_adapter, AdapterStream, ObdClient};
pub use decoder::{decode, ParsedFrame, SEARCHING_MARKER};
pub use error::ObdError;
pub use framer::{
    FrameOutcome, FramingPolicy, RawResponse, ResponseFramer, MAX_RESPONSE_BYTES, PROMPT,
};
pub use pid::{Command, Pid};
pub use snapshot::{CycleReadings, TelemetrySnapshot};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Added to the request mode in a positive response (`01` -> `41`)
    pub const RESPONSE_OFFSET: u8 = 0x40;
}
