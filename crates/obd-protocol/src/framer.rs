//! Response Framing
//!
//! Reads adapter output until the `>` prompt appears or the idle read budget
//! runs out. Streams do not expose a "bytes available" check, so every idle
//! attempt is a read bounded by the backoff interval.
//!
//! Output without a prompt is capped at [`MAX_RESPONSE_BYTES`]: an adapter
//! that keeps printing noise must not hold the read open forever.

use crate::error::ObdError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

/// Prompt character the adapter prints when it is ready for the next command
pub const PROMPT: char = '>';

/// Size of a single read
const READ_BUFFER_SIZE: usize = 1024;

/// Most output accumulated for one response before giving up on the prompt
pub const MAX_RESPONSE_BYTES: usize = 4 * READ_BUFFER_SIZE;

/// Bounded read-retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingPolicy {
    /// Idle read attempts allowed before giving up
    pub max_idle_attempts: u32,
    /// How long a single idle attempt waits for bytes
    pub idle_backoff: Duration,
}

impl FramingPolicy {
    /// Total time spent waiting when nothing ever arrives
    pub fn budget(&self) -> Duration {
        self.idle_backoff * self.max_idle_attempts
    }
}

impl Default for FramingPolicy {
    fn default() -> Self {
        Self {
            max_idle_attempts: 5,
            idle_backoff: Duration::from_millis(500),
        }
    }
}

/// Text accumulated for one command, prompt included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse(String);

impl RawResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Result of one framing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The prompt was seen
    Complete(RawResponse),
    /// The idle budget or the size cap ran out first; whatever arrived is
    /// kept for logging
    TimedOut { partial: String },
}

/// Delimits the adapter byte stream into responses
#[derive(Debug, Clone, Default)]
pub struct ResponseFramer {
    policy: FramingPolicy,
}

impl ResponseFramer {
    pub fn new(policy: FramingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FramingPolicy {
        self.policy
    }

    /// Read one response.
    ///
    /// Idle attempts are counted across the whole read and never reset when
    /// bytes arrive. EOF and I/O errors are stream faults.
    pub async fn read<R>(&self, reader: &mut R) -> Result<FrameOutcome, ObdError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut accumulated = String::new();
        let mut idle_attempts = 0;

        while idle_attempts < self.policy.max_idle_attempts {
            match tokio::time::timeout(self.policy.idle_backoff, reader.read(&mut buf)).await {
                Ok(Ok(0)) => return Err(ObdError::StreamClosed),
                Ok(Ok(n)) => {
                    // Chunks are appended untrimmed: a read boundary may fall
                    // between two hex tokens.
                    accumulated.push_str(&String::from_utf8_lossy(&buf[..n]));
                    trace!("Read {} bytes from adapter", n);

                    if accumulated.contains(PROMPT) {
                        return Ok(FrameOutcome::Complete(RawResponse::new(
                            accumulated.trim(),
                        )));
                    }
                    if accumulated.len() > MAX_RESPONSE_BYTES {
                        warn!(
                            "No prompt after {} bytes of adapter output, giving up",
                            accumulated.len()
                        );
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    idle_attempts += 1;
                    debug!(
                        "No adapter output (idle attempt {}/{})",
                        idle_attempts, self.policy.max_idle_attempts
                    );
                }
            }
        }

        Ok(FrameOutcome::TimedOut {
            partial: accumulated.trim().to_string(),
        })
    }

    /// Discard output that is already waiting on the stream.
    ///
    /// A reply that shows up after its read timed out would otherwise be
    /// taken as the answer to the next command. Never waits for more bytes.
    /// Returns the number of bytes dropped.
    pub async fn discard_pending<R>(&self, reader: &mut R) -> Result<usize, ObdError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut stale = String::new();
        let mut dropped = 0;

        while dropped <= MAX_RESPONSE_BYTES {
            match tokio::time::timeout(Duration::ZERO, reader.read(&mut buf)).await {
                Ok(Ok(0)) => return Err(ObdError::StreamClosed),
                Ok(Ok(n)) => {
                    dropped += n;
                    stale.push_str(&String::from_utf8_lossy(&buf[..n]));
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }

        if dropped > 0 {
            warn!("Discarded stale adapter output {:?}", stale.trim());
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_complete_response() {
        let (mut adapter, mut host) = duplex(64);
        adapter.write_all(b"010D\r41 0D 3C\r\r>").await.unwrap();

        let outcome = ResponseFramer::default().read(&mut host).await.unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Complete(RawResponse::new("010D\r41 0D 3C\r\r>"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_split_across_reads() {
        let (mut adapter, mut host) = duplex(64);
        tokio::spawn(async move {
            adapter.write_all(b"SEARCHING...\r41 0C").await.unwrap();
            tokio::time::sleep(Duration::from_millis(700)).await;
            adapter.write_all(b" 0B B8\r>").await.unwrap();
            // keep the stream open until the reader is done
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let outcome = ResponseFramer::default().read(&mut host).await.unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Complete(RawResponse::new("SEARCHING...\r41 0C 0B B8\r>"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_nothing_arrives() {
        let (_adapter, mut host) = duplex(64);
        let framer = ResponseFramer::default();
        let start = Instant::now();

        let outcome = framer.read(&mut host).await.unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::TimedOut {
                partial: String::new()
            }
        );
        assert_eq!(start.elapsed(), framer.policy().budget());
        assert_eq!(framer.policy().budget(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_output() {
        let (mut adapter, mut host) = duplex(64);
        adapter.write_all(b"41 0D").await.unwrap();

        let policy = FramingPolicy {
            max_idle_attempts: 2,
            idle_backoff: Duration::from_millis(100),
        };
        let outcome = ResponseFramer::new(policy).read(&mut host).await.unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::TimedOut {
                partial: "41 0D".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_noise_without_prompt_gives_up() {
        let (mut adapter, mut host) = duplex(64);
        tokio::spawn(async move {
            loop {
                if adapter.write_all(b"BUS BUSY ").await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(600),
            ResponseFramer::default().read(&mut host),
        )
        .await
        .expect("read never gave up")
        .unwrap();

        match outcome {
            FrameOutcome::TimedOut { partial } => {
                assert!(partial.starts_with("BUS BUSY"));
                assert!(partial.len() >= MAX_RESPONSE_BYTES);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_pending_drops_waiting_output_only() {
        let (mut adapter, mut host) = duplex(64);
        adapter.write_all(b"010C\r41 0C 2E E0\r\r>").await.unwrap();
        let framer = ResponseFramer::default();
        let start = Instant::now();

        assert_eq!(framer.discard_pending(&mut host).await.unwrap(), 19);
        assert_eq!(framer.discard_pending(&mut host).await.unwrap(), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);

        adapter.write_all(b"41 0D 3C>").await.unwrap();
        let outcome = framer.read(&mut host).await.unwrap();
        assert_eq!(outcome, FrameOutcome::Complete(RawResponse::new("41 0D 3C>")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_is_a_fault() {
        let (adapter, mut host) = duplex(64);
        drop(adapter);

        let err = ResponseFramer::default().read(&mut host).await.unwrap_err();
        assert!(matches!(err, ObdError::StreamClosed));
    }
}
