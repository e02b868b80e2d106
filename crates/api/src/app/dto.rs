use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use storefront_core::{ChannelName, DomainError};
use storefront_events::BroadcastMessage;

// -------------------------
// Request DTOs
// -------------------------

/// Envelope of every `POST /realtime` body. The remaining fields depend on
/// the action.
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
}

impl BroadcastRequest {
    /// Validate into a message ready for fan-out.
    pub fn into_message(self) -> Result<BroadcastMessage, DomainError> {
        let channel = ChannelName::new(self.channel.unwrap_or_default())?;
        let event = self.event.unwrap_or_default();
        let event = event.trim();
        if event.is_empty() {
            return Err(DomainError::validation("event must not be empty"));
        }

        Ok(BroadcastMessage::new(channel.as_str(), event, self.payload))
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
