//! Management routes
//!
//! These expose the management port over JSON, guarded by the configured
//! admin bearer token. With no token configured the routes refuse outright.

use crate::handlers::error_response;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use std::sync::Arc;
use wavecap_core::types::{User, UserId, UserKey};
use wavecap_core::Error;
use wavecap_database::{DirectoryQueries, UserQueries};

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Error> {
    let Some(expected) = &state.config.auth.admin_token else {
        return Err(Error::Forbidden {
            message: "management routes disabled: no admin token configured".to_string(),
        });
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(Error::Unauthorized {
            message: "missing or invalid admin token".to_string(),
        })
    }
}

/// `GET /api/admin/users`
pub async fn list_users(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize_admin(&state, &headers) {
        return error_response(&e);
    }

    let users: Vec<User> = state
        .management
        .list_users()
        .iter()
        .map(|u| (**u).clone())
        .collect();
    Json(users).into_response()
}

/// `PUT /api/admin/users` - create or update an account
pub async fn grant_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(user): Json<User>,
) -> Response {
    if let Err(e) = authorize_admin(&state, &headers) {
        return error_response(&e);
    }

    match state.management.grant_or_update_user(user).await {
        Ok(stored) => (StatusCode::OK, Json((*stored).clone())).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `DELETE /api/admin/users/:id` - revoke access and drop open sessions
pub async fn revoke_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<UserId>,
) -> Response {
    if let Err(e) = authorize_admin(&state, &headers) {
        return error_response(&e);
    }

    match state.management.revoke_user(&UserKey::Id(id)).await {
        Ok(closed_sessions) => Json(serde_json::json!({
            "revoked": id,
            "closedSessions": closed_sessions,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Body of a batch connection-limit update
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitUpdate {
    /// Target account
    pub user_id: UserId,
    /// New cap, absent for unlimited
    #[serde(default)]
    pub connection_limit: Option<u32>,
}

/// `PATCH /api/admin/users/limits`
pub async fn update_connection_limits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(updates): Json<Vec<LimitUpdate>>,
) -> Response {
    if let Err(e) = authorize_admin(&state, &headers) {
        return error_response(&e);
    }

    let updates: Vec<(UserId, Option<u32>)> = updates
        .into_iter()
        .map(|u| (u.user_id, u.connection_limit))
        .collect();

    match state.management.batch_update_connection_limit(&updates).await {
        Ok(()) => Json(serde_json::json!({"updated": updates.len()})).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/admin/directory`
pub async fn list_directory(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize_admin(&state, &headers) {
        return error_response(&e);
    }

    Json(state.management.list_systems_talkgroups_groups()).into_response()
}

/// `POST /api/admin/reload` - re-read directory and accounts from the database
pub async fn reload(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize_admin(&state, &headers) {
        return error_response(&e);
    }

    let Some(pool) = &state.pool else {
        return error_response(&Error::Transient {
            message: "no database attached, nothing to reload from".to_string(),
        });
    };

    let directory = match DirectoryQueries::load(pool).await {
        Ok(directory) => directory,
        Err(e) => return error_response(&e),
    };
    let users = match UserQueries::list(pool).await {
        Ok(users) => users,
        Err(e) => return error_response(&e),
    };

    state.directory.reload(directory);
    state.access.replace_all(users);

    Json(serde_json::json!({"reloaded": true})).into_response()
}
