//! Message Collector
//!
//! Receiving side of the broadcast: accepts one message per connection,
//! drops exact repeats, and forwards parsed messages to a channel.

use crate::message::OutboundMessage;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Upper bound on a single message
const MAX_MESSAGE_BYTES: u64 = 4096;

/// Collector settings
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// How long a sender may take to deliver and close
    pub read_timeout: Duration,
    /// How many recent messages are remembered for duplicate detection
    pub dedup_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(15),
            dedup_capacity: 1024,
        }
    }
}

/// Bounded set of recently seen message hashes
struct RecentMessages {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl RecentMessages {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` if the message was already seen
    fn insert(&mut self, message: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        let hash = hasher.finish();

        if !self.seen.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// TCP collector for broadcast messages
pub struct Collector {
    listener: TcpListener,
    config: CollectorConfig,
}

impl Collector {
    /// Bind the listening socket
    pub async fn bind(addr: &str, config: CollectorConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown or until the receiver is dropped
    pub async fn run(self, tx: mpsc::Sender<OutboundMessage>, mut shutdown: watch::Receiver<bool>) {
        info!("Collector listening on {:?}", self.listener.local_addr());
        let recent = Arc::new(Mutex::new(RecentMessages::new(self.config.dedup_capacity)));

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if tx.is_closed() {
                        break;
                    }
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        self.config.read_timeout,
                        Arc::clone(&recent),
                        tx.clone(),
                    ));
                }
                Err(e) => warn!("Accept failed: {}", e),
            }
        }

        info!("Collector stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    read_timeout: Duration,
    recent: Arc<Mutex<RecentMessages>>,
    tx: mpsc::Sender<OutboundMessage>,
) {
    let mut raw = Vec::new();
    let mut limited = stream.take(MAX_MESSAGE_BYTES);

    match tokio::time::timeout(read_timeout, limited.read_to_end(&mut raw)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            warn!("Read from {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("Read from {} timed out", peer);
            return;
        }
    }

    let text = String::from_utf8_lossy(&raw);
    let text = text.trim();
    if text.is_empty() {
        return;
    }

    let fresh = match recent.lock() {
        Ok(mut recent) => recent.insert(text),
        Err(poisoned) => poisoned.into_inner().insert(text),
    };
    if !fresh {
        debug!("Duplicate message from {} dropped", peer);
        metrics::counter!("collector_messages_total", "outcome" => "duplicate").increment(1);
        return;
    }

    match text.parse::<OutboundMessage>() {
        Ok(message) => {
            debug!("Received from {}: {}", peer, message);
            metrics::counter!("collector_messages_total", "outcome" => "accepted").increment(1);
            let _ = tx.send(message).await;
        }
        Err(e) => {
            warn!("Malformed message from {}: {} ({:?})", peer, e, text);
            metrics::counter!("collector_messages_total", "outcome" => "malformed").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{BroadcastDispatcher, Endpoint};
    use crate::message::LocationFix;
    use chrono::{TimeZone, Utc};
    use obd_protocol::TelemetrySnapshot;
    use tokio::io::AsyncWriteExt;

    async fn start() -> (Endpoint, mpsc::Receiver<OutboundMessage>, watch::Sender<bool>) {
        let collector = Collector::bind("127.0.0.1:0", CollectorConfig::default())
            .await
            .unwrap();
        let port = collector.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(collector.run(tx, shutdown_rx));
        (Endpoint::new("127.0.0.1", port), rx, shutdown_tx)
    }

    async fn send_raw(endpoint: &Endpoint, text: &str) {
        let mut stream = TcpStream::connect((endpoint.address.as_str(), endpoint.port))
            .await
            .unwrap();
        stream.write_all(text.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    fn message(speed_kmh: u8) -> OutboundMessage {
        OutboundMessage::new(
            "cab42",
            LocationFix::new(
                11.0041,
                -74.807,
                Utc.with_ymd_and_hms(2024, 10, 1, 7, 0, 0).unwrap(),
            ),
            TelemetrySnapshot {
                speed_kmh,
                engine_rpm: 800,
                fuel_level_percent: 33,
            },
        )
    }

    #[tokio::test]
    async fn test_receives_broadcast() {
        let (endpoint, mut rx, _shutdown) = start().await;
        let dispatcher = BroadcastDispatcher::new(vec![endpoint], Duration::from_secs(5));

        dispatcher.broadcast(&message(45)).join().await;

        assert_eq!(rx.recv().await.unwrap(), message(45));
    }

    #[tokio::test]
    async fn test_duplicates_and_garbage_are_dropped() {
        let (endpoint, mut rx, _shutdown) = start().await;

        send_raw(&endpoint, &message(10).to_string()).await;
        assert_eq!(rx.recv().await.unwrap(), message(10));

        send_raw(&endpoint, &message(10).to_string()).await;
        send_raw(&endpoint, "hello").await;
        send_raw(&endpoint, &message(11).to_string()).await;

        // only the new message makes it through
        assert_eq!(rx.recv().await.unwrap(), message(11));
    }

    #[test]
    fn test_recent_messages_forget_oldest() {
        let mut recent = RecentMessages::new(2);
        assert!(recent.insert("a"));
        assert!(recent.insert("b"));
        assert!(!recent.insert("a"));
        assert!(recent.insert("c"));
        // "a" was evicted by "c"
        assert!(recent.insert("a"));
    }
}
