//! Workspace facade for the wavecap server
//!
//! Re-exports the member crates so integration tests and downstream tools can
//! reach everything through a single dependency.

#![forbid(unsafe_code)]

pub use wavecap_api as api;
pub use wavecap_core as core;
pub use wavecap_database as database;
pub use wavecap_ingest as ingest;
pub use wavecap_stream as stream;
