use axum::{routing::get, Router};

pub mod realtime;
pub mod system;

/// Router for every hub-backed endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/status", get(system::status))
        .merge(realtime::router())
}
