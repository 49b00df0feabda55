//! Relay configuration
//!
//! Defaults, then an optional TOML file, then `OBD_RELAY__*` environment
//! variables (nested keys separated by `__`).

use broadcast::{is_valid_client_id, BroadcastDispatcher, CollectorConfig, Endpoint};
use config::{Config, ConfigError, Environment, File, FileFormat};
use obd_protocol::FramingPolicy;
use obd_scheduler::PollerConfig;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "obd-relay.toml";

const ENV_PREFIX: &str = "OBD_RELAY";

/// What the relay reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Location plus polled OBD-II telemetry
    GpsAndObd,
    /// Location only; the adapter is never opened and telemetry reads 0
    GpsOnly,
}

/// Adapter link settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Serial device (e.g. `/dev/rfcomm0`) or `tcp://host:port`
    pub path: String,
    pub baud_rate: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            path: "/dev/rfcomm0".to_string(),
            baud_rate: 38400,
        }
    }
}

/// Built-in static location source
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub interval_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
        }
    }
}

/// Collector binary settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub listen: String,
    pub read_timeout_ms: u64,
    pub dedup_capacity: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:16000".to_string(),
            read_timeout_ms: 15_000,
            dedup_capacity: 1024,
        }
    }
}

impl CollectorSettings {
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            dedup_capacity: self.dedup_capacity,
        }
    }
}

/// Top-level relay configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Identifier sent in every message; a random one is generated if unset
    pub client_id: String,
    pub mode: SessionMode,
    pub adapter: AdapterConfig,
    /// Collection endpoints, in delivery order
    pub endpoints: Vec<Endpoint>,
    pub poll_interval_ms: u64,
    pub inter_command_delay_ms: u64,
    pub idle_read_attempts: u32,
    pub idle_read_backoff_ms: u64,
    pub delivery_timeout_ms: u64,
    pub location: LocationConfig,
    pub logging: LoggingConfig,
    /// Prometheus exporter listen address, disabled if unset
    pub metrics_addr: Option<String>,
    pub collector: CollectorSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            client_id: generate_client_id(),
            mode: SessionMode::GpsAndObd,
            adapter: AdapterConfig::default(),
            endpoints: vec![Endpoint::new("127.0.0.1", 16000)],
            poll_interval_ms: 1000,
            inter_command_delay_ms: 500,
            idle_read_attempts: 5,
            idle_read_backoff_ms: 500,
            delivery_timeout_ms: 5000,
            location: LocationConfig::default(),
            logging: LoggingConfig::default(),
            metrics_addr: None,
            collector: CollectorSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Load from an explicit file (which must exist) or from
    /// [`DEFAULT_CONFIG_FILE`] if present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize::<Self>()?.validated()
    }

    /// Parse TOML text without consulting files or the environment
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Reject a client ID the collector could not parse back
    fn validated(self) -> Result<Self, ConfigError> {
        if !is_valid_client_id(&self.client_id) {
            return Err(ConfigError::Message(format!(
                "client_id {:?} must be letters, digits or '_' only",
                self.client_id
            )));
        }
        Ok(self)
    }

    pub fn framing_policy(&self) -> FramingPolicy {
        FramingPolicy {
            max_idle_attempts: self.idle_read_attempts,
            idle_backoff: Duration::from_millis(self.idle_read_backoff_ms),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            inter_command_delay: Duration::from_millis(self.inter_command_delay_ms),
        }
    }

    pub fn dispatcher(&self) -> BroadcastDispatcher {
        BroadcastDispatcher::new(
            self.endpoints.clone(),
            Duration::from_millis(self.delivery_timeout_ms),
        )
    }
}

/// Hyphen-free UUID, so it survives the collector's `\w+` ID pattern
fn generate_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}
