//! Location + Telemetry Wire Message
//!
//! A single line of labelled fields:
//! `ID: <id> Latitude: <lat> Longitude: <lon> Timestamp: <yyyy-MM-dd HH:mm:ss> Speed: <n> RPM: <n> Fuel: <n>`

use crate::MessageParseError;
use chrono::{DateTime, NaiveDateTime, Utc};
use obd_protocol::TelemetrySnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp layout on the wire (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A position reported by the location collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }
}

/// One message fanned out to every endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub client_id: String,
    pub fix: LocationFix,
    pub telemetry: TelemetrySnapshot,
}

impl OutboundMessage {
    pub fn new(client_id: impl Into<String>, fix: LocationFix, telemetry: TelemetrySnapshot) -> Self {
        Self {
            client_id: client_id.into(),
            fix,
            telemetry,
        }
    }
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Six decimals keep the decimal point even for whole degrees
        write!(
            f,
            "ID: {} Latitude: {:.6} Longitude: {:.6} Timestamp: {} Speed: {} RPM: {} Fuel: {}",
            self.client_id,
            self.fix.latitude,
            self.fix.longitude,
            self.fix.timestamp.format(TIMESTAMP_FORMAT),
            self.telemetry.speed_kmh,
            self.telemetry.engine_rpm,
            self.telemetry.fuel_level_percent,
        )
    }
}

/// Client IDs are non-empty runs of ASCII letters, digits and `_`
pub fn is_valid_client_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl FromStr for OutboundMessage {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s.trim();

        let client_id = labelled(&mut rest, "ID:")?;
        if !is_valid_client_id(client_id) {
            return Err(invalid("ID", client_id));
        }

        let latitude: f64 = parse_number(labelled(&mut rest, "Latitude:")?, "Latitude")?;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(invalid("Latitude", &latitude.to_string()));
        }
        let longitude: f64 = parse_number(labelled(&mut rest, "Longitude:")?, "Longitude")?;
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(invalid("Longitude", &longitude.to_string()));
        }

        let date = labelled(&mut rest, "Timestamp:")?;
        let (time, remaining) = take_token(rest);
        rest = remaining;
        let stamp = format!("{date} {time}");
        let timestamp = NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT)
            .map_err(|_| invalid("Timestamp", &stamp))?
            .and_utc();

        let speed_kmh = parse_number(labelled(&mut rest, "Speed:")?, "Speed")?;
        let engine_rpm = parse_number(labelled(&mut rest, "RPM:")?, "RPM")?;
        let fuel_level_percent: u8 = parse_number(labelled(&mut rest, "Fuel:")?, "Fuel")?;
        if fuel_level_percent > 100 {
            return Err(invalid("Fuel", &fuel_level_percent.to_string()));
        }

        Ok(Self {
            client_id: client_id.to_string(),
            fix: LocationFix::new(latitude, longitude, timestamp),
            telemetry: TelemetrySnapshot {
                speed_kmh,
                engine_rpm,
                fuel_level_percent,
            },
        })
    }
}

/// Split off the next whitespace-delimited token
fn take_token(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    input.split_at(end)
}

/// Consume `label` and the token after it
fn labelled<'a>(rest: &mut &'a str, label: &'static str) -> Result<&'a str, MessageParseError> {
    let current: &'a str = *rest;
    let after = current
        .trim_start()
        .strip_prefix(label)
        .ok_or(MessageParseError::MissingField(label))?;

    let (value, remaining) = take_token(after);
    if value.is_empty() {
        return Err(MessageParseError::MissingField(label));
    }
    *rest = remaining;
    Ok(value)
}

fn parse_number<T: FromStr>(value: &str, field: &'static str) -> Result<T, MessageParseError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn invalid(field: &'static str, value: &str) -> MessageParseError {
    MessageParseError::InvalidValue {
        field,
        value: value.to_string(),
    }
}
