//! REST access to the call archive, mirroring the `list` and playback
//! session commands for non-streaming clients

use crate::handlers::error_response;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use std::sync::Arc;
use wavecap_core::types::CallId;
use wavecap_stream::SearchOptions;

/// `GET /api/calls` - paginated archive search
pub async fn list_calls(
    State(state): State<Arc<AppState>>,
    Query(options): Query<SearchOptions>,
) -> Response {
    match state.search.search(&options).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/calls/:id/audio` - the stored audio blob
pub async fn call_audio(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CallId>,
) -> Response {
    match state.store.get(id).await {
        Ok(call) => (
            [
                (header::CONTENT_TYPE, call.audio_mime),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", call.audio_filename),
                ),
            ],
            call.audio,
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}
