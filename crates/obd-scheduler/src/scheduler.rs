//! Poll Cycle Implementation

use obd_protocol::{CycleReadings, ObdClient, ObdError, Pid, TelemetrySnapshot};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Configuration for the poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between the end of one cycle and the start of the next
    pub poll_interval: Duration,
    /// Adapter settle time after each command
    pub inter_command_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            inter_command_delay: Duration::from_millis(500),
        }
    }
}

/// Position in the fixed command cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// No cycle in progress
    Idle,
    SendingSpeed,
    SendingRpm,
    SendingFuel,
    /// All three commands done, snapshot commit pending
    Updating,
}

impl CycleState {
    /// PID requested in this state
    pub fn pid(&self) -> Option<Pid> {
        match self {
            CycleState::SendingSpeed => Some(Pid::Speed),
            CycleState::SendingRpm => Some(Pid::Rpm),
            CycleState::SendingFuel => Some(Pid::FuelLevel),
            CycleState::Idle | CycleState::Updating => None,
        }
    }

    fn next(&self) -> CycleState {
        match self {
            CycleState::Idle => CycleState::SendingSpeed,
            CycleState::SendingSpeed => CycleState::SendingRpm,
            CycleState::SendingRpm => CycleState::SendingFuel,
            CycleState::SendingFuel => CycleState::Updating,
            CycleState::Updating => CycleState::Idle,
        }
    }
}

/// Read handle on the latest telemetry
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<TelemetrySnapshot>,
}

impl SnapshotReader {
    /// Latest committed snapshot
    pub fn latest(&self) -> TelemetrySnapshot {
        *self.rx.borrow()
    }

    /// Wait for the next commit. Returns `false` once the poller is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Fixed-cycle poller owning the adapter client.
///
/// Cycles never overlap: every transition needs `&mut self`, and [`ObdPoller::run`]
/// only schedules the next cycle after the previous one returns.
pub struct ObdPoller<S> {
    client: ObdClient<S>,
    config: PollerConfig,
    state: CycleState,
    readings: CycleReadings,
    snapshot_tx: watch::Sender<TelemetrySnapshot>,
    cycles_completed: u64,
}

impl<S> ObdPoller<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new poller
    pub fn new(client: ObdClient<S>, config: PollerConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(TelemetrySnapshot::default());

        Self {
            client,
            config,
            state: CycleState::Idle,
            readings: CycleReadings::default(),
            snapshot_tx,
            cycles_completed: 0,
        }
    }

    /// Get a reader for the latest snapshot
    pub fn subscribe(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.snapshot_tx.subscribe(),
        }
    }

    /// Current cycle state
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Latest committed snapshot
    pub fn snapshot(&self) -> TelemetrySnapshot {
        *self.snapshot_tx.borrow()
    }

    /// Number of cycles that reached the commit
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Advance the cycle by one transition and return the new state.
    ///
    /// Command states query their PID and then wait the inter-command delay.
    /// A framing timeout or stream fault aborts the cycle: nothing from it is
    /// committed and the state returns to `Idle`.
    pub async fn step(&mut self) -> Result<CycleState, ObdError> {
        match self.state {
            CycleState::Idle => {
                self.readings = CycleReadings::default();
            }
            CycleState::SendingSpeed | CycleState::SendingRpm | CycleState::SendingFuel => {
                if let Some(pid) = self.state.pid() {
                    if let Err(e) = self.query(pid).await {
                        self.abort(&e);
                        return Err(e);
                    }
                }
                tokio::time::sleep(self.config.inter_command_delay).await;
            }
            CycleState::Updating => {
                let readings = self.readings;
                self.snapshot_tx.send_modify(|snapshot| snapshot.merge(&readings));
                self.cycles_completed += 1;
                metrics::counter!("obd_cycles_total", "outcome" => "completed").increment(1);
                debug!(
                    "Cycle {} committed ({}/3 decoded): {:?}",
                    self.cycles_completed,
                    readings.decoded_count(),
                    self.snapshot()
                );
            }
        }

        self.state = self.state.next();
        Ok(self.state)
    }

    /// Drive transitions until the cycle returns to `Idle`
    pub async fn run_cycle(&mut self) -> Result<TelemetrySnapshot, ObdError> {
        loop {
            if self.step().await? == CycleState::Idle {
                return Ok(self.snapshot());
            }
        }
    }

    /// Poll until shutdown. Each cycle starts one poll interval after the
    /// previous one finished, whether it succeeded or not.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting OBD poller (interval {:?}, command delay {:?})",
            self.config.poll_interval, self.config.inter_command_delay
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.run_cycle().await {
                warn!("OBD poll cycle aborted: {}", e);
            }
        }

        info!("OBD poller stopped after {} cycles", self.cycles_completed);
    }

    async fn query(&mut self, pid: Pid) -> Result<(), ObdError> {
        match self.client.query_pid(pid).await? {
            Some(value) => {
                debug!("Decoded {} = {}", pid, value);
                self.readings.record(pid, value);
            }
            None => {
                debug!("No valid {} reply, keeping previous value", pid);
                metrics::counter!("obd_decode_mismatch_total", "pid" => pid.to_string())
                    .increment(1);
            }
        }
        Ok(())
    }

    fn abort(&mut self, err: &ObdError) {
        if err.is_timeout() {
            metrics::counter!("obd_framing_timeouts_total").increment(1);
        } else {
            metrics::counter!("obd_stream_faults_total").increment(1);
        }
        metrics::counter!("obd_cycles_total", "outcome" => "aborted").increment(1);

        self.readings = CycleReadings::default();
        self.state = CycleState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::FramingPolicy;
    use std::collections::VecDeque;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    /// Adapter that expects commands in order and answers each with the
    /// scripted reply, or stays silent for `None`.
    fn spawn_adapter(
        adapter: DuplexStream,
        script: Vec<(&'static str, Option<&'static str>)>,
    ) -> JoinHandle<Vec<String>> {
        let script = script
            .into_iter()
            .map(|(command, reply)| (command, reply, Duration::ZERO))
            .collect();
        spawn_slow_adapter(adapter, script)
    }

    /// Like [`spawn_adapter`], but each reply is written after its delay
    fn spawn_slow_adapter(
        mut adapter: DuplexStream,
        script: Vec<(&'static str, Option<&'static str>, Duration)>,
    ) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut script: VecDeque<_> = script.into();
            let mut seen = Vec::new();
            let mut pending = String::new();
            let mut buf = [0u8; 64];

            loop {
                let n = match adapter.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                pending.push_str(&String::from_utf8_lossy(&buf[..n]));

                while let Some(pos) = pending.find('\r') {
                    let command: String = pending.drain(..=pos).collect();
                    let command = command.trim().to_string();
                    let (expected, reply, delay) =
                        script.pop_front().expect("unexpected command");
                    assert_eq!(command, expected);
                    if let Some(reply) = reply {
                        tokio::time::sleep(delay).await;
                        adapter.write_all(reply.as_bytes()).await.unwrap();
                    }
                    seen.push(command);
                }
            }
            seen
        })
    }

    fn poller(host: DuplexStream) -> ObdPoller<DuplexStream> {
        ObdPoller::new(
            ObdClient::new(host, FramingPolicy::default()),
            PollerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle() {
        let (adapter, host) = duplex(256);
        let adapter = spawn_adapter(
            adapter,
            vec![
                ("010D", Some("010D\r41 0D 3C\r\r>")),
                ("010C", Some("010C\r41 0C 2E E0\r\r>")),
                ("012F", Some("012F\r41 2F FF\r\r>")),
            ],
        );
        let mut poller = poller(host);
        let start = Instant::now();

        let snapshot = poller.run_cycle().await.unwrap();

        assert_eq!(
            snapshot,
            TelemetrySnapshot {
                speed_kmh: 60,
                engine_rpm: 3000,
                fuel_level_percent: 100,
            }
        );
        // one settle delay after each of the three commands
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
        assert_eq!(poller.cycles_completed(), 1);

        drop(poller);
        assert_eq!(adapter.await.unwrap(), ["010D", "010C", "012F"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions_commit_only_at_update() {
        let (adapter, host) = duplex(256);
        let _adapter = spawn_adapter(
            adapter,
            vec![
                ("010D", Some("41 0D 14>")),
                ("010C", Some("41 0C 0F A0>")),
                ("012F", Some("41 2F 80>")),
            ],
        );
        let mut poller = poller(host);
        let reader = poller.subscribe();

        assert_eq!(poller.state(), CycleState::Idle);
        assert_eq!(poller.step().await.unwrap(), CycleState::SendingSpeed);
        assert_eq!(poller.step().await.unwrap(), CycleState::SendingRpm);
        assert_eq!(poller.step().await.unwrap(), CycleState::SendingFuel);
        assert_eq!(poller.step().await.unwrap(), CycleState::Updating);
        assert_eq!(reader.latest(), TelemetrySnapshot::default());

        assert_eq!(poller.step().await.unwrap(), CycleState::Idle);
        assert_eq!(
            reader.latest(),
            TelemetrySnapshot {
                speed_kmh: 20,
                engine_rpm: 1000,
                fuel_level_percent: 50,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_decodes_keep_previous_values() {
        let (adapter, host) = duplex(256);
        let _adapter = spawn_adapter(
            adapter,
            vec![
                ("010D", Some("41 0D 3C>")),
                ("010C", Some("41 0C 2E E0>")),
                ("012F", Some("41 2F FF>")),
                ("010D", Some("NO DATA\r\r>")),
                ("010C", Some("41 0C 1A F8>")),
                ("012F", Some("41 2F ZZ>")),
            ],
        );
        let mut poller = poller(host);

        poller.run_cycle().await.unwrap();
        let snapshot = poller.run_cycle().await.unwrap();

        assert_eq!(
            snapshot,
            TelemetrySnapshot {
                speed_kmh: 60,
                engine_rpm: 1726,
                fuel_level_percent: 100,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_read_failures_report_zero() {
        let (adapter, host) = duplex(256);
        let _adapter = spawn_adapter(
            adapter,
            vec![
                ("010D", Some("SEARCHING...\r>")),
                ("010C", Some("41 0C 0B B8>")),
                ("012F", Some("UNABLE TO CONNECT\r>")),
            ],
        );
        let mut poller = poller(host);

        let snapshot = poller.run_cycle().await.unwrap();
        assert_eq!(
            snapshot,
            TelemetrySnapshot {
                speed_kmh: 0,
                engine_rpm: 750,
                fuel_level_percent: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_cycle_without_commit() {
        let (adapter, host) = duplex(256);
        let _adapter = spawn_adapter(
            adapter,
            vec![("010D", Some("41 0D 3C>")), ("010C", None)],
        );
        let mut poller = poller(host);
        let reader = poller.subscribe();

        let err = poller.run_cycle().await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(poller.state(), CycleState::Idle);
        assert_eq!(poller.cycles_completed(), 0);
        assert_eq!(reader.latest(), TelemetrySnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continues_after_aborted_cycle() {
        let (adapter, host) = duplex(256);
        let _adapter = spawn_adapter(
            adapter,
            vec![
                ("010D", None),
                ("010D", Some("41 0D 50>")),
                ("010C", Some("41 0C 0B B8>")),
                ("012F", Some("41 2F 40>")),
            ],
        );
        let poller = poller(host);
        let mut reader = poller.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(poller.run(shutdown_rx));

        assert!(reader.changed().await);
        assert_eq!(
            reader.latest(),
            TelemetrySnapshot {
                speed_kmh: 80,
                engine_rpm: 750,
                fuel_level_percent: 25,
            }
        );

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_does_not_shift_later_cycles() {
        let cycle = [
            ("010D", Some("010D\r41 0D 3C\r\r>"), Duration::ZERO),
            ("010C", Some("010C\r41 0C 2E E0\r\r>"), Duration::ZERO),
            ("012F", Some("012F\r41 2F FF\r\r>"), Duration::ZERO),
        ];
        let mut script = vec![
            ("010D", Some("010D\r41 0D 3C\r\r>"), Duration::ZERO),
            // answered after the 2.5 s framing budget
            ("010C", Some("010C\r41 0C 2E E0\r\r>"), Duration::from_secs(3)),
        ];
        for _ in 0..4 {
            script.extend(cycle);
        }
        let (adapter, host) = duplex(256);
        let _adapter = spawn_slow_adapter(adapter, script);
        let mut poller = poller(host);

        let err = poller.run_cycle().await.unwrap_err();
        assert!(err.is_timeout());

        let expected = TelemetrySnapshot {
            speed_kmh: 60,
            engine_rpm: 3000,
            fuel_level_percent: 100,
        };
        for completed in 1..=4 {
            tokio::time::sleep(PollerConfig::default().poll_interval).await;
            assert_eq!(poller.run_cycle().await.unwrap(), expected);
            assert_eq!(poller.cycles_completed(), completed);
        }
    }
}
