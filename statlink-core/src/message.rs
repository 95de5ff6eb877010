//! Wire vocabulary shared with the monitoring server
//!
//! Every frame is a JSON text frame holding one envelope:
//!
//! ```text
//! { "type": "LOG" | "RESULT" | "SETTINGS", "data": <any> }
//! ```
//!
//! - `LOG` (outbound): `data = { "stats": <host payload> }`
//! - `SETTINGS` (outbound, once per open): `data = { "serviceTimeout": <ms> }`
//! - `RESULT` (inbound): `data` is opaque and handed to the host as-is

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Outbound telemetry
    Log,
    /// Inbound computation result
    Result,
    /// Outbound handshake describing the expected reporting cadence
    Settings,
}

impl MessageType {
    /// Wire name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Log => "LOG",
            MessageType::Result => "RESULT",
            MessageType::Settings => "SETTINGS",
        }
    }

    /// Parse a wire name, returning None for anything outside the closed set
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "LOG" => Some(MessageType::Log),
            "RESULT" => Some(MessageType::Result),
            "SETTINGS" => Some(MessageType::Settings),
            _ => None,
        }
    }
}

/// Classification a host may attach to its statistics payloads.
///
/// Opaque to the reporting engine: it is serialized with the payload and
/// never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorType {
    Error,
    Warning,
}

/// Unit of wire exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self { kind, data }
    }

    /// Telemetry envelope wrapping a host payload as `{ "stats": payload }`
    pub fn log(stats: Value) -> Self {
        Self::new(MessageType::Log, serde_json::json!({ "stats": stats }))
    }

    /// Handshake envelope advertising `2 * interval` as the server-side
    /// staleness timeout
    pub fn settings(interval: Duration) -> Self {
        let timeout_ms = interval.as_millis().saturating_mul(2);
        let timeout_ms = u64::try_from(timeout_ms).unwrap_or(u64::MAX);
        Self::new(
            MessageType::Settings,
            serde_json::json!({ "serviceTimeout": timeout_ms }),
        )
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `RESULT` envelope
    Result(Value),
    /// Any other type, known or not. Logged and otherwise ignored.
    Unrecognized { kind: String, data: Value },
}

/// Inbound envelopes are decoded loosely so that a type outside the closed
/// set is reported as unrecognized rather than as a decode failure.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl Inbound {
    /// Decode a text frame received from the server
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        Ok(match MessageType::from_wire(&raw.kind) {
            Some(MessageType::Result) => Inbound::Result(raw.data),
            _ => Inbound::Unrecognized {
                kind: raw.kind,
                data: raw.data,
            },
        })
    }
}
