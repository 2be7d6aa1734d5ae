//! Request middleware
//!
//! The general API limiter is a token bucket per client IP. The call-upload
//! route is wired around it (recorders burst heavily and are gated by API
//! keys instead), as is the health endpoint.

use crate::state::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};

type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

static LIMITER: OnceLock<IpRateLimiter> = OnceLock::new();

fn limiter(per_minute: u32) -> &'static IpRateLimiter {
    LIMITER.get_or_init(|| {
        let per_minute = NonZeroU32::new(per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        RateLimiter::keyed(Quota::per_minute(per_minute))
    })
}

/// Token-bucket rate limiting per client IP
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if limiter(state.config.server.rate_limit)
        .check_key(&addr.ip())
        .is_ok()
    {
        next.run(request).await
    } else {
        tracing::warn!(ip = %addr.ip(), path = %request.uri().path(), "rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "transient",
                "message": "rate limit exceeded, try again shortly",
            })),
        )
            .into_response()
    }
}
