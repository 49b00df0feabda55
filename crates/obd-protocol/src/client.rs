//! OBD-II Client for ELM327 Adapters
//!
//! Sends Mode 01 commands over any async duplex stream (serial port,
//! Bluetooth RFCOMM device node, or a WiFi adapter's TCP socket) and decodes
//! the framed replies.

use crate::decoder;
use crate::error::ObdError;
use crate::framer::{FrameOutcome, FramingPolicy, RawResponse, ResponseFramer};
use crate::pid::{Command, Pid};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

/// Prefix selecting a TCP adapter instead of a serial device
const TCP_SCHEME: &str = "tcp://";

/// Byte stream to an adapter
pub trait AdapterStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AdapterStream for T {}

/// Open the adapter link.
///
/// # Arguments
/// * `path` - Serial device path (e.g., "/dev/rfcomm0") or `tcp://host:port`
/// * `baud_rate` - Baud rate for serial devices
pub async fn open_adapter(path: &str, baud_rate: u32) -> Result<Box<dyn AdapterStream>, ObdError> {
    if let Some(addr) = path.strip_prefix(TCP_SCHEME) {
        info!("Connecting to OBD adapter at {}", addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        return Ok(Box::new(stream));
    }

    info!("Opening OBD adapter on {} at {} baud", path, baud_rate);
    let port = tokio_serial::new(path, baud_rate)
        .open_native_async()
        .map_err(|e| ObdError::SerialError(e.to_string()))?;
    Ok(Box::new(port))
}

/// OBD-II client owning the adapter stream
pub struct ObdClient<S> {
    stream: S,
    framer: ResponseFramer,
}

impl<S> ObdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new OBD client over an open stream
    pub fn new(stream: S, policy: FramingPolicy) -> Self {
        Self {
            stream,
            framer: ResponseFramer::new(policy),
        }
    }

    /// Write a command followed by a carriage return
    pub async fn send_command(&mut self, command: &Command) -> Result<(), ObdError> {
        debug!("Sending {}", command);
        self.stream.write_all(&command.to_wire()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next framed response
    pub async fn read_response(&mut self) -> Result<FrameOutcome, ObdError> {
        self.framer.read(&mut self.stream).await
    }

    /// Send a command and wait for its complete response.
    ///
    /// Output still waiting from an earlier command (a reply that arrived
    /// after its read timed out) is discarded first. A framing timeout is
    /// reported as [`ObdError::Timeout`].
    pub async fn request(&mut self, command: &Command) -> Result<RawResponse, ObdError> {
        self.framer.discard_pending(&mut self.stream).await?;
        self.send_command(command).await?;

        match self.read_response().await? {
            FrameOutcome::Complete(raw) => {
                debug!("{} -> {:?}", command, raw.as_str());
                Ok(raw)
            }
            FrameOutcome::TimedOut { partial } => {
                debug!("{} timed out, partial output {:?}", command, partial);
                let budget_ms = self.framer.policy().budget().as_millis() as u64;
                Err(ObdError::Timeout(budget_ms))
            }
        }
    }

    /// Query a PID and return the decoded value.
    ///
    /// `Ok(None)` means the adapter answered but no valid `41 <PID>` reply
    /// was found.
    pub async fn query_pid(&mut self, pid: Pid) -> Result<Option<u16>, ObdError> {
        let raw = self.request(&Command::current_data(pid)).await?;
        Ok(decoder::decode(raw.as_str(), pid))
    }

    /// Framing policy in use
    pub fn policy(&self) -> FramingPolicy {
        self.framer.policy()
    }

    /// Give the stream back
    pub fn into_inner(self) -> S {
        self.stream
    }
}
