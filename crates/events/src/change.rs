//! Row-level change events decoded from database notifications.
//!
//! A notification payload is the JSON text a trigger hands to `pg_notify`:
//!
//! ```text
//! {"operation": "INSERT", "record": {"id": "42", "status": "pending"}}
//! ```
//!
//! The channel name is not part of the payload; it comes from the
//! notification itself.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Kind of row mutation that produced a change event.
///
/// Unknown operations are kept verbatim in [`Operation::Other`] so custom
/// trigger tags still reach clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Truncate,
    Other(String),
}

impl Operation {
    /// Parse an operation name case-insensitively (`INSERT`, `insert`, ...).
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.to_ascii_uppercase().as_str() {
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "TRUNCATE" => Self::Truncate,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// Canonical (upper-case) name, as Postgres reports `TG_OP`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Other(s) => s,
        }
    }

    /// Tag clients see in the `event` field of a domain message.
    pub fn event_tag(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl From<String> for Operation {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Operation> for String {
    fn from(value: Operation) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to turn a raw notification payload into a [`ChangeEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not a valid change notification: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation must not be empty")]
    EmptyOperation,
}

/// A single row mutation on a notification channel.
///
/// Ephemeral: produced by the listener, consumed once by the broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub channel: String,
    pub operation: Operation,
    pub record: JsonValue,
}

#[derive(Deserialize)]
struct NotificationBody {
    operation: String,
    record: JsonValue,
}

impl ChangeEvent {
    pub fn new(channel: impl Into<String>, operation: Operation, record: JsonValue) -> Self {
        Self {
            channel: channel.into(),
            operation,
            record,
        }
    }

    /// Decode a notification payload received on `channel`.
    pub fn decode(channel: &str, payload: &str) -> Result<Self, DecodeError> {
        let body: NotificationBody = serde_json::from_str(payload)?;
        if body.operation.trim().is_empty() {
            return Err(DecodeError::EmptyOperation);
        }

        Ok(Self {
            channel: channel.to_string(),
            operation: Operation::parse(&body.operation),
            record: body.record,
        })
    }
}
