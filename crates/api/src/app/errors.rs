use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use storefront_core::DomainError;
use storefront_realtime::SinkError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
    }
}

pub fn sink_error_to_response(err: SinkError) -> axum::response::Response {
    match err {
        SinkError::Closed => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "shutting_down",
            "realtime hub is shutting down",
        ),
        other => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "stream_error",
            other.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
