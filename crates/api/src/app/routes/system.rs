use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use storefront_realtime::RealtimeHub;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Diagnostics for operators: connection count and listener state.
pub async fn status(Extension(hub): Extension<Arc<RealtimeHub>>) -> impl IntoResponse {
    let stats = hub.stats();
    Json(json!({
        "activeConnections": stats.active_connections,
        "listener": hub.listener_state().as_str(),
        "channels": hub.config().channels.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
    }))
}
