//! Core types and shared components for the wavecap server

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

pub mod access;
pub mod config;
pub mod directory;
pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use access::AccessStore;
pub use config::Config;
pub use directory::{Directory, DirectoryStore};
pub use error::{Error, ErrorKind, Result};
pub use types::{Call, CallId, CallSummary, FilterMatrix, Scope, SystemRef, TalkgroupRef, User};

/// Initialize the logging system
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| Error::Internal {
        message: format!("failed to install tracing subscriber: {e}"),
    })
}
