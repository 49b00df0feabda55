//! Telemetry Snapshot

use crate::pid::Pid;
use serde::{Deserialize, Serialize};

/// Latest known vehicle telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Vehicle speed (km/h)
    pub speed_kmh: u8,
    /// Engine RPM
    pub engine_rpm: u16,
    /// Fuel tank level (0-100%)
    pub fuel_level_percent: u8,
}

impl TelemetrySnapshot {
    /// Apply the readings of one cycle. Fields without a reading keep their
    /// previous value.
    pub fn merge(&mut self, readings: &CycleReadings) {
        if let Some(speed) = readings.speed_kmh {
            self.speed_kmh = speed;
        }
        if let Some(rpm) = readings.engine_rpm {
            self.engine_rpm = rpm;
        }
        if let Some(fuel) = readings.fuel_level_percent {
            self.fuel_level_percent = fuel;
        }
    }
}

/// Values decoded during a single poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReadings {
    pub speed_kmh: Option<u8>,
    pub engine_rpm: Option<u16>,
    pub fuel_level_percent: Option<u8>,
}

impl CycleReadings {
    /// Record a decoded value for a PID
    pub fn record(&mut self, pid: Pid, value: u16) {
        match pid {
            Pid::Speed => self.speed_kmh = u8::try_from(value).ok(),
            Pid::Rpm => self.engine_rpm = Some(value),
            Pid::FuelLevel => self.fuel_level_percent = u8::try_from(value).ok(),
        }
    }

    /// Number of PIDs that decoded this cycle
    pub fn decoded_count(&self) -> usize {
        [
            self.speed_kmh.is_some(),
            self.engine_rpm.is_some(),
            self.fuel_level_percent.is_some(),
        ]
        .iter()
        .filter(|decoded| **decoded)
        .count()
    }
}
