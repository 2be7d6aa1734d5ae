//! Health endpoint

use crate::state::AppState;
use axum::extract::State;
use axum::response::Json;
use std::sync::Arc;

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let dispatcher = state.dispatcher.stats();
    let reconnection = state.reconnection.stats();

    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.len(),
        "dispatcher": {
            "dispatched": dispatcher.dispatched,
            "delivered": dispatcher.delivered,
            "dropped": dispatcher.dropped,
        },
        "reconnection": {
            "enabled": reconnection.enabled,
            "disconnectedUsers": reconnection.disconnected_users,
            "bufferedCalls": reconnection.buffered_calls,
        },
    }))
}
