//! OBD-II PID Definitions and Commands
//!
//! Defines the Mode 01 Parameter IDs polled from the vehicle and their
//! byte-to-value formulas.

use crate::mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mode 01 PIDs polled by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Fuel tank level input (0x2F)
    FuelLevel = 0x2F,
}

impl Pid {
    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Get the number of data bytes following the `41 <PID>` header
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::Rpm => 2,
            Pid::Speed | Pid::FuelLevel => 1,
        }
    }

    /// Decode data bytes to an integer value using the PID formula.
    ///
    /// Returns `None` if fewer than [`Pid::response_bytes`] bytes are given.
    pub fn decode_value(&self, bytes: &[u8]) -> Option<u16> {
        match (self, bytes) {
            // Speed: A (km/h)
            (Pid::Speed, [a, ..]) => Some(u16::from(*a)),
            // RPM: ((A*256)+B)/4, integer division
            (Pid::Rpm, [a, b, ..]) => Some(((u16::from(*a) << 8) | u16::from(*b)) / 4),
            // Fuel level: A*100/255 (%), truncated
            (Pid::FuelLevel, [a, ..]) => Some((u32::from(*a) * 100 / 255) as u16),
            _ => None,
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pid::Rpm => "rpm",
            Pid::Speed => "speed",
            Pid::FuelLevel => "fuel_level",
        };
        f.write_str(name)
    }
}

/// A request sent to the adapter, e.g. `010D`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    mode: u8,
    pid: Pid,
}

impl Command {
    /// Mode 01 "show current data" request for a PID
    pub fn current_data(pid: Pid) -> Self {
        Self {
            mode: mode::CURRENT_DATA,
            pid,
        }
    }

    /// The PID this command requests
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// ASCII bytes as written to the adapter, carriage return included
    pub fn to_wire(&self) -> Vec<u8> {
        format!("{self}\r").into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.mode, self.pid.as_hex())
    }
}
