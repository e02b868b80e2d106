//! Messages delivered to connected clients.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use storefront_core::ConnectionId;

/// A domain message fanned out to every live connection.
///
/// Field order is the wire order: `{"channel":..,"event":..,"payload":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub channel: String,
    pub event: String,
    pub payload: JsonValue,
}

impl BroadcastMessage {
    pub fn new(channel: impl Into<String>, event: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            channel: channel.into(),
            event: event.into(),
            payload,
        }
    }
}

/// Stream housekeeping frames, addressed to a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    Ping {
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },
}

impl ControlFrame {
    pub fn connected(connection_id: ConnectionId) -> Self {
        Self::Connected { connection_id }
    }

    pub fn ping_now() -> Self {
        Self::Ping {
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Anything that can be written to a client stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamFrame {
    Control(ControlFrame),
    Message(BroadcastMessage),
}

impl From<ControlFrame> for StreamFrame {
    fn from(value: ControlFrame) -> Self {
        Self::Control(value)
    }
}

impl From<BroadcastMessage> for StreamFrame {
    fn from(value: BroadcastMessage) -> Self {
        Self::Message(value)
    }
}
