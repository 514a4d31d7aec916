//! Wire types for the real-time hub.
//!
//! The hub speaks a JSON record protocol over WebSocket text frames. Each
//! record is terminated by the ASCII record separator (`0x1E`) and a frame may
//! carry several records.
//!
//! 1. Client sends `{"protocol":"json","version":1}`
//! 2. Hub answers `{}` to accept or `{"error":"..."}` to reject
//! 3. Hub pushes invocation records (`type` 1) whose `target` names the event
//!    kind and whose first argument is the event envelope
//! 4. Either side may send pings (`type` 6); the hub ends with `type` 7

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::SubscriptionError;
use crate::models::Values;

/// Terminator appended to every record.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// Kinds of change notification pushed by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    EntryCreated,
    EntryDeleted,
    EntryUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::EntryCreated,
        EventKind::EntryDeleted,
        EventKind::EntryUpdated,
    ];

    /// Hub target name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::EntryCreated => "entryCreated",
            EventKind::EntryDeleted => "entryDeleted",
            EventKind::EntryUpdated => "entryUpdated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SubscriptionError::Protocol(format!("unknown event kind: {}", s)))
    }
}

/// Handshake record sent right after the socket opens.
pub fn handshake_request() -> String {
    format!(
        "{{\"protocol\":\"json\",\"version\":1}}{}",
        RECORD_SEPARATOR
    )
}

/// Keepalive record sent by the client.
pub fn ping_record() -> String {
    format!("{{\"type\":{}}}{}", PING, RECORD_SEPARATOR)
}

/// The hub's answer to the handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

/// Splits a text frame into its records, dropping the separators.
pub fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// A decoded hub record.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation { target: String, arguments: Vec<Value> },
    Ping,
    Close { error: Option<String> },
    /// Record types the client does not act on (acks, completions, ...).
    Other(u8),
}

impl HubMessage {
    pub fn decode(record: &str) -> Result<Self, SubscriptionError> {
        let raw: RawRecord = serde_json::from_str(record)
            .map_err(|e| SubscriptionError::Protocol(format!("bad hub record: {}", e)))?;

        Ok(match raw.kind {
            INVOCATION => HubMessage::Invocation {
                target: raw.target.ok_or_else(|| {
                    SubscriptionError::Protocol("invocation without target".to_string())
                })?,
                arguments: raw.arguments,
            },
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close { error: raw.error },
            other => HubMessage::Other(other),
        })
    }
}

/// Envelope carried as the first argument of every event invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub database_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub data: Value,
}

impl EventEnvelope {
    /// Decodes an invocation argument, which is either a JSON-encoded string
    /// or the envelope object itself.
    pub fn from_argument(argument: Value) -> Result<Self, SubscriptionError> {
        let decoded = match argument {
            Value::String(text) => serde_json::from_str(&text),
            other => serde_json::from_value(other),
        };
        decoded.map_err(|e| SubscriptionError::Protocol(format!("bad event envelope: {}", e)))
    }

    pub(crate) fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, SubscriptionError> {
        T::deserialize(&self.data)
            .map_err(|e| SubscriptionError::Protocol(format!("bad event payload: {}", e)))
    }
}

/// `data` of `entryCreated` and `entryDeleted`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPayload {
    pub collection_name: String,
    pub values: Values,
}

/// `data` of `entryUpdated`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub collection_name: String,
    pub old_values: Values,
    pub new_values: Values,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

/// Accepts RFC 3339 text or epoch milliseconds.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| D::Error::custom(format!("invalid timestamp {}: {}", text, e))),
    }
}
