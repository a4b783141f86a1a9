//! Error types for directory operations.
//!
//! Every directory operation has its own variant so that a caller sequencing several operations
//! can tell exactly which step failed. Protocol-level detail (the LDAP result code and the
//! diagnostic text) travels in a [`DirectoryFailure`] cause.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// LDAP result code `noSuchObject`.
pub const NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code `invalidCredentials`.
pub const INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code `noSuchAttribute`.
pub const NO_SUCH_ATTRIBUTE: u32 = 16;
/// LDAP result code `entryAlreadyExists`.
pub const ENTRY_ALREADY_EXISTS: u32 = 68;
/// LDAP result code `notAllowedOnNonLeaf`.
pub const NOT_ALLOWED_ON_NON_LEAF: u32 = 66;

/// Underlying cause of a failed directory operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryFailure {
    /// LDAP result code, when the server answered.
    pub code: Option<u32>,
    /// Diagnostic message.
    pub message: String,
}

impl DirectoryFailure {
    /// Failure reported by the server with a result code.
    #[must_use]
    pub fn server(code: u32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Failure that happened below the protocol (socket, handshake, closed connection).
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Failure caused by an operation exceeding its deadline.
    #[must_use]
    pub fn timed_out(operation: &str, after: Duration) -> Self {
        Self::connection(format!("{operation} timed out after {}s", after.as_secs()))
    }
}

impl fmt::Display for DirectoryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (result code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Main error type for directory sessions and transports.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Socket or TLS handshake failure.
    #[error("Transport error: {target}: {message}")]
    Transport {
        /// `host:port` the transport tried to reach
        target: String,
        /// Underlying cause
        message: String,
    },

    /// Authentication or connectivity failure at bind time.
    #[error("Bind failed for {principal}: {cause}")]
    Bind {
        /// Principal used for the bind
        principal: String,
        /// Underlying cause
        cause: DirectoryFailure,
    },

    /// Entry creation failed.
    #[error("Add failed for {dn}: {cause}")]
    Add {
        /// Target entry
        dn: String,
        /// Underlying cause
        cause: DirectoryFailure,
    },

    /// Attribute modification failed.
    #[error("Modify failed for {dn}: {cause}")]
    Modify {
        /// Target entry
        dn: String,
        /// Underlying cause
        cause: DirectoryFailure,
    },

    /// Distinguished-name rename failed.
    #[error("Rename failed for {from} -> {to}: {cause}")]
    Rename {
        /// Current name of the entry
        from: String,
        /// Requested new name
        to: String,
        /// Underlying cause
        cause: DirectoryFailure,
    },

    /// Entry removal failed.
    #[error("Delete failed for {dn}: {cause}")]
    Delete {
        /// Target entry
        dn: String,
        /// Underlying cause
        cause: DirectoryFailure,
    },

    /// Search request or result retrieval failed.
    #[error("Search failed under {base}: {cause}")]
    Search {
        /// Search base
        base: String,
        /// Underlying cause
        cause: DirectoryFailure,
    },

    /// Malformed distinguished name, filter or payload, rejected before any network I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation attempted while the session is not bound.
    #[error("Invalid session state: cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation
        operation: String,
        /// Current session state
        state: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Bind { .. } => "BIND_ERROR",
            Self::Add { .. } => "ADD_ERROR",
            Self::Modify { .. } => "MODIFY_ERROR",
            Self::Rename { .. } => "RENAME_ERROR",
            Self::Delete { .. } => "DELETE_ERROR",
            Self::Search { .. } => "SEARCH_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Returns the directory failure carried by per-operation variants.
    #[must_use]
    pub fn cause(&self) -> Option<&DirectoryFailure> {
        match self {
            Self::Bind { cause, .. }
            | Self::Add { cause, .. }
            | Self::Modify { cause, .. }
            | Self::Rename { cause, .. }
            | Self::Delete { cause, .. }
            | Self::Search { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Returns the LDAP result code, if the server produced one.
    #[must_use]
    pub fn result_code(&self) -> Option<u32> {
        self.cause().and_then(|cause| cause.code)
    }

    /// Returns true if the server reported that the target (or search base) does not exist.
    #[must_use]
    pub fn is_no_such_object(&self) -> bool {
        self.result_code() == Some(NO_SUCH_OBJECT)
    }

    /// Returns true if this error should be logged as a serious error.
    ///
    /// Connectivity and configuration problems qualify; a server rejecting an individual
    /// operation does not.
    #[must_use]
    pub fn should_log(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Config(_) => true,
            other => other.cause().is_some_and(|cause| cause.code.is_none()),
        }
    }

    /// Builds an [`Error::InvalidState`] for `operation` attempted in `state`.
    #[must_use]
    pub fn invalid_state(operation: &str, state: impl fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid directory URL: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Config(err.to_string())
    }
}
