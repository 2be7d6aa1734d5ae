//! Real-time call distribution for wavecap
//!
//! Home of the session registry, the live-feed dispatcher, the reconnection
//! manager, the search/playback engine, the per-session state machine and the
//! management port. Everything here is transport-agnostic: the api crate
//! adapts WebSockets onto sessions, and this crate never blocks the fan-out
//! on a slow client.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

pub mod commands;
pub mod dispatcher;
pub mod handler;
pub mod manage;
pub mod reconnection;
pub mod registry;
pub mod search;
pub mod session;

pub use commands::{CallPayload, ErrorPayload, InboundMessage, OutboundMessage};
pub use dispatcher::Dispatcher;
pub use handler::{LoginGuard, SessionContext};
pub use manage::Management;
pub use reconnection::ReconnectionManager;
pub use registry::SessionRegistry;
pub use search::{SearchEngine, SearchOptions, SearchResponse};
pub use session::{Session, SessionReceivers, SessionState};
