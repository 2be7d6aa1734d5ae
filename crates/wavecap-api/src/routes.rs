//! Route table

use crate::handlers::{admin, calls, health, upload, ws};
use crate::middleware::rate_limit_middleware;
use crate::state::AppState;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the complete router
///
/// The call-upload route and the WebSocket upgrade sit outside the general
/// rate limiter; everything under `/api` except the upload goes through it.
pub fn build_router(state: Arc<AppState>) -> Router {
    let limited_api = Router::new()
        .route("/api/calls", get(calls::list_calls))
        .route("/api/calls/:id/audio", get(calls::call_audio))
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users", put(admin::grant_user))
        .route("/api/admin/users/:id", delete(admin::revoke_user))
        .route(
            "/api/admin/users/limits",
            patch(admin::update_connection_limits),
        )
        .route("/api/admin/directory", get(admin::list_directory))
        .route("/api/admin/reload", post(admin::reload))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/call-upload", post(upload::handle_call_upload))
        .route("/ws", get(ws::websocket_handler))
        .merge(limited_api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
