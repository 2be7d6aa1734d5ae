//! wavecap HTTP/WebSocket server library

#![forbid(unsafe_code)]

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
