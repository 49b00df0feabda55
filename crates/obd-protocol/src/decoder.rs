//! Response Decoding
//!
//! Turns a framed adapter response into a PID value. The adapter may echo the
//! command, print `SEARCHING...` while it locks onto the bus, and always ends
//! with the prompt; only `41 <PID> <data...>` sequences carry values.

use crate::framer::PROMPT;
use crate::mode;
use crate::pid::Pid;

/// Adapter noise printed before the first response after power-up
pub const SEARCHING_MARKER: &str = "SEARCHING...";

/// Whitespace-separated tokens of a response after noise stripping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    tokens: Vec<String>,
}

impl ParsedFrame {
    /// Strip noise and tokenize. Never fails; malformed tokens are kept and
    /// skipped during scanning.
    pub fn parse(raw: &str) -> Self {
        let cleaned = raw
            .to_ascii_uppercase()
            .replace(SEARCHING_MARKER, " ")
            .replace(PROMPT, " ");

        Self {
            tokens: cleaned.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Data bytes of the first well-formed `41 <PID> <data...>` match
    pub fn find_data(&self, pid: Pid) -> Option<Vec<u8>> {
        let header = mode::CURRENT_DATA + mode::RESPONSE_OFFSET;

        self.tokens
            .windows(2 + pid.response_bytes())
            .filter(|window| {
                parse_hex_byte(&window[0]) == Some(header)
                    && parse_hex_byte(&window[1]) == Some(pid.as_hex())
            })
            .find_map(|window| window[2..].iter().map(|t| parse_hex_byte(t)).collect())
    }

    /// Decode the value for `pid`, or `None` if no valid match exists
    pub fn decode(&self, pid: Pid) -> Option<u16> {
        self.find_data(pid)
            .and_then(|data| pid.decode_value(&data))
    }
}

/// Decode a raw response for a single PID
pub fn decode(raw: &str, pid: Pid) -> Option<u16> {
    ParsedFrame::parse(raw).decode(pid)
}

/// Parse a strict two-digit hex byte
fn parse_hex_byte(token: &str) -> Option<u8> {
    if token.len() != 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(token, 16).ok()
}
