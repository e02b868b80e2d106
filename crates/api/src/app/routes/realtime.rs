//! Realtime push endpoints.
//!
//! `GET` opens a long-lived `text/event-stream` response, `POST` is the
//! small control surface used by operators and back-office jobs.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::Extension,
    http::{header, HeaderName, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::Value as JsonValue;
use tokio_stream::{wrappers::ReceiverStream, Stream};
use tracing::{debug, info, instrument};

use storefront_events::EVENT_STREAM_CONTENT_TYPE;
use storefront_realtime::{ConnectionHandle, RealtimeHub};

use crate::app::dto::{BroadcastRequest, ControlRequest, SuccessResponse};
use crate::app::errors;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new().route("/realtime", get(stream).post(control))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /realtime
///
/// Frames arrive pre-encoded as `data: <json>\n\n`:
/// - `{"type":"connected","connectionId":..}` first
/// - `{"type":"ping","timestamp":..}` on every keepalive tick
/// - `{"channel":..,"event":..,"payload":..}` for every change
pub async fn stream(Extension(hub): Extension<Arc<RealtimeHub>>) -> axum::response::Response {
    let (handle, frames) = match hub.open_channel() {
        Ok(opened) => opened,
        Err(err) => return errors::sink_error_to_response(err),
    };
    debug!(connection_id = %handle.id(), "streaming realtime connection");

    let body = Body::from_stream(ConnectionStream {
        frames: ReceiverStream::new(frames),
        _handle: handle,
    });

    (
        [
            (header::CONTENT_TYPE, EVENT_STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        body,
    )
        .into_response()
}

/// POST /realtime
///
/// `{"action":"stats"}` or
/// `{"action":"broadcast","channel":..,"event":..,"payload":..}`.
#[instrument(skip_all)]
pub async fn control(
    Extension(hub): Extension<Arc<RealtimeHub>>,
    body: Bytes,
) -> axum::response::Response {
    let value: JsonValue = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string());
        }
    };
    let request: ControlRequest = match serde_json::from_value(value.clone()) {
        Ok(r) => r,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string());
        }
    };

    match request.action.as_deref() {
        Some("stats") => Json(hub.stats()).into_response(),
        Some("broadcast") => broadcast(&hub, value),
        Some(other) => errors::json_error(
            StatusCode::BAD_REQUEST,
            "unknown_action",
            format!("unknown action: {other}"),
        ),
        None => errors::json_error(
            StatusCode::BAD_REQUEST,
            "unknown_action",
            "missing action",
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn broadcast(hub: &RealtimeHub, value: JsonValue) -> axum::response::Response {
    let request: BroadcastRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string());
        }
    };
    let message = match request.into_message() {
        Ok(m) => m,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let report = hub.broadcast(&message);
    info!(
        channel = %message.channel,
        event = %message.event,
        delivered = report.delivered,
        evicted = report.evicted,
        "manual broadcast accepted"
    );
    Json(SuccessResponse::ok()).into_response()
}

/// Response body of one stream connection.
///
/// Owns the [`ConnectionHandle`]: when the client goes away hyper drops the
/// body, which closes the connection in the hub.
struct ConnectionStream {
    frames: ReceiverStream<Vec<u8>>,
    _handle: ConnectionHandle,
}

impl Stream for ConnectionStream {
    type Item = Result<Vec<u8>, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().frames)
            .poll_next(cx)
            .map(|frame| frame.map(Ok))
    }
}
