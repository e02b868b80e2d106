//! Event-stream wire framing: one `data: <JSON>\n\n` record per frame.

use serde::Serialize;
use thiserror::Error;

use crate::message::{BroadcastMessage, StreamFrame};

/// Media type of the push stream.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

const DATA_PREFIX: &[u8] = b"data: ";
const FRAME_TERMINATOR: &[u8] = b"\n\n";

#[derive(Debug, Error)]
#[error("failed to encode stream frame: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Encode a frame as a single event-stream record.
pub fn encode_frame(frame: &StreamFrame) -> Result<Vec<u8>, EncodeError> {
    encode_record(frame)
}

/// Encode a domain message without wrapping it in a [`StreamFrame`] first.
///
/// Same bytes as `encode_frame(&StreamFrame::Message(..))`.
pub fn encode_message(message: &BroadcastMessage) -> Result<Vec<u8>, EncodeError> {
    encode_record(message)
}

// Compact JSON never contains a raw newline, so one `data:` line is enough.
fn encode_record<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let json = serde_json::to_vec(value)?;

    let mut out = Vec::with_capacity(DATA_PREFIX.len() + json.len() + FRAME_TERMINATOR.len());
    out.extend_from_slice(DATA_PREFIX);
    out.extend_from_slice(&json);
    out.extend_from_slice(FRAME_TERMINATOR);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{BroadcastMessage, ControlFrame};
    use serde_json::json;
    use storefront_core::ConnectionId;

    fn encode_str(frame: impl Into<StreamFrame>) -> String {
        String::from_utf8(encode_frame(&frame.into()).unwrap()).unwrap()
    }

    #[test]
    fn domain_message_framing_is_exact() {
        let msg = BroadcastMessage::new("orders", "insert", json!({"id": "42"}));
        assert_eq!(
            encode_str(msg),
            "data: {\"channel\":\"orders\",\"event\":\"insert\",\"payload\":{\"id\":\"42\"}}\n\n"
        );
    }

    #[test]
    fn bare_message_encodes_like_wrapped_frame() {
        let msg = BroadcastMessage::new("orders", "update", json!({"id": "7", "status": "ready"}));
        assert_eq!(
            encode_message(&msg).unwrap(),
            encode_frame(&StreamFrame::Message(msg)).unwrap()
        );
    }

    #[test]
    fn connected_frame_carries_connection_id() {
        let id = ConnectionId::new();
        assert_eq!(
            encode_str(ControlFrame::connected(id)),
            format!("data: {{\"type\":\"connected\",\"connectionId\":\"{id}\"}}\n\n")
        );
    }

    #[test]
    fn ping_frame_carries_epoch_millis() {
        assert_eq!(
            encode_str(ControlFrame::Ping { timestamp: 1_700_000_000_123 }),
            "data: {\"type\":\"ping\",\"timestamp\":1700000000123}\n\n"
        );
    }

    #[test]
    fn record_keys_keep_trigger_order() {
        let ev = crate::change::ChangeEvent::decode(
            "orders",
            r#"{"operation":"UPDATE","record":{"status":"ready","id":"7","customer":{"name":"Ada","email":"a@x"}}}"#,
        )
        .unwrap();
        let msg = BroadcastMessage::new("orders", ev.operation.event_tag(), ev.record);

        assert_eq!(
            encode_str(msg),
            "data: {\"channel\":\"orders\",\"event\":\"update\",\"payload\":{\"status\":\"ready\",\"id\":\"7\",\"customer\":{\"name\":\"Ada\",\"email\":\"a@x\"}}}\n\n"
        );
    }

    #[test]
    fn multiline_string_payloads_stay_on_one_line() {
        let msg = BroadcastMessage::new("orders", "note", json!({"text": "two\nlines"}));
        let encoded = encode_str(msg);
        assert_eq!(encoded.matches('\n').count(), 2);
        assert!(encoded.ends_with("\n\n"));
    }
}
