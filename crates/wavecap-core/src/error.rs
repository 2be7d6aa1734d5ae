//! Error taxonomy for the wavecap server
//!
//! Every fallible operation in the workspace reports one of the kinds below.
//! Clients only ever see the fixed string for the kind; the detail fields are
//! for operator logs.

use std::{error::Error as StdError, fmt};

/// Enumerated error kinds shared by every result in the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid key, token or PIN
    Unauthorized,
    /// Authenticated but not allowed to reach the resource
    Forbidden,
    /// Call, user or system does not exist
    NotFound,
    /// Schema or value-range violation
    InvalidArgument,
    /// Duplicate identity on create
    Conflict,
    /// Database or external tool exceeded its bound
    Timeout,
    /// Infrastructure failure, caller may retry
    Transient,
    /// A bug; full detail stays in the logs
    Internal,
}

impl ErrorKind {
    /// Stable machine-parseable name of the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not-found",
            Self::InvalidArgument => "invalid-argument",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Internal => "internal",
        }
    }

    /// Fixed string shown to clients for this kind
    #[must_use]
    pub const fn client_message(self) -> &'static str {
        match self {
            Self::Unauthorized => "authentication required",
            Self::Forbidden => "access denied",
            Self::NotFound => "resource not found",
            Self::InvalidArgument => "invalid request",
            Self::Conflict => "already exists",
            Self::Timeout => "request timed out",
            Self::Transient => "temporary failure, try again",
            Self::Internal => "internal server error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the wavecap server
#[derive(Debug)]
pub enum Error {
    /// Missing or invalid key, token or PIN
    Unauthorized {
        /// Operator-facing detail
        message: String,
    },

    /// Authenticated but not authorized for the resource
    Forbidden {
        /// Operator-facing detail
        message: String,
    },

    /// Resource does not exist
    NotFound {
        /// Resource that was not found
        resource: String,
    },

    /// Schema or value-range violation
    InvalidArgument {
        /// Field that failed validation
        field: String,
        /// Validation detail
        message: String,
    },

    /// Duplicate identity on create
    Conflict {
        /// Operator-facing detail
        message: String,
    },

    /// An operation exceeded its bound
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Infrastructure failure; caller may retry
    Transient {
        /// Operator-facing detail
        message: String,
    },

    /// A bug
    Internal {
        /// Operator-facing detail
        message: String,
    },

    /// I/O error
    Io(std::io::Error),

    /// Serialization error
    Serialization(serde_json::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The taxonomy kind this error belongs to
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidArgument { .. } | Self::Serialization(_) => ErrorKind::InvalidArgument,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transient { .. } | Self::Io(_) => ErrorKind::Transient,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Fixed string shown to clients
    #[must_use]
    pub const fn client_message(&self) -> &'static str {
        self.kind().client_message()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized { message } => write!(f, "unauthorized: {message}"),
            Self::Forbidden { message } => write!(f, "forbidden: {message}"),
            Self::NotFound { resource } => write!(f, "not found: {resource}"),
            Self::InvalidArgument { field, message } => {
                write!(f, "invalid argument: {field} - {message}")
            }
            Self::Conflict { message } => write!(f, "conflict: {message}"),
            Self::Timeout { duration_ms } => {
                write!(f, "operation timed out after {duration_ms}ms")
            }
            Self::Transient { message } => write!(f, "transient failure: {message}"),
            Self::Internal { message } => write!(f, "internal error: {message}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Serialization(err) => write!(f, "serialization error: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}
