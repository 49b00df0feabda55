//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur while talking to the adapter
#[derive(Debug, Error)]
pub enum ObdError {
    /// I/O failure on the serial/RFCOMM channel
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No prompt arrived within the idle read budget
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// The adapter closed the stream
    #[error("Adapter stream closed")]
    StreamClosed,
}

impl ObdError {
    /// Framing timeouts are expected while the adapter is still settling
    pub fn is_timeout(&self) -> bool {
        matches!(self, ObdError::Timeout(_))
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
