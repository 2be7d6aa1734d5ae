//! HTTP and WebSocket handlers

pub mod admin;
pub mod calls;
pub mod health;
pub mod upload;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use wavecap_core::{Error, ErrorKind};

/// HTTP status for each error kind
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turn a core error into the machine-parseable response body
///
/// Clients only ever see the kind and its fixed string; the detail stays in
/// the server log.
#[must_use]
pub fn error_response(error: &Error) -> Response {
    let kind = error.kind();
    tracing::debug!(kind = kind.as_str(), error = %error, "request failed");

    (
        status_for(kind),
        Json(serde_json::json!({
            "error": kind.as_str(),
            "message": kind.client_message(),
        })),
    )
        .into_response()
}
