//! Error types for the persistence layer.
//!
//! Every failure surfaced by the object store carries one of four symbolic
//! [`ErrorKind`]s plus a list of placeholder strings, so that callers can map
//! errors to their own message catalogue without parsing display text.
//! Wire-level faults are wrapped as [`BackendError`] and always classify as
//! [`ErrorKind::ServerFailure`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Symbolic error kinds understood by callers of the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The backend failed or the store is misconfigured.
    ServerFailure,
    /// A caller-supplied argument is malformed.
    InvalidFieldValue,
    /// A patch is malformed or cannot be applied.
    InvalidPatch,
    /// The addressed object does not exist.
    ObjectNotFound,
}

impl ErrorKind {
    /// Returns the symbolic name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ServerFailure => "ServerFailure",
            ErrorKind::InvalidFieldValue => "InvalidFieldValue",
            ErrorKind::InvalidPatch => "InvalidPatch",
            ErrorKind::ObjectNotFound => "ObjectNotFound",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("server failure: {}", .placeholders.join(", "))]
    ServerFailure { placeholders: Vec<String> },

    #[error("invalid field value: {}", .placeholders.join(", "))]
    InvalidFieldValue { placeholders: Vec<String> },

    #[error("invalid patch: {}", .placeholders.join(", "))]
    InvalidPatch { placeholders: Vec<String> },

    #[error("object not found: {}", .placeholders.join(", "))]
    ObjectNotFound { placeholders: Vec<String> },

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

fn collect<I, S>(placeholders: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    placeholders.into_iter().map(Into::into).collect()
}

impl StorageError {
    /// Creates a `ServerFailure` error.
    pub fn server_failure<I, S>(placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StorageError::ServerFailure {
            placeholders: collect(placeholders),
        }
    }

    /// Creates an `InvalidFieldValue` error.
    pub fn invalid_field_value<I, S>(placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StorageError::InvalidFieldValue {
            placeholders: collect(placeholders),
        }
    }

    /// Creates an `InvalidPatch` error.
    pub fn invalid_patch<I, S>(placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StorageError::InvalidPatch {
            placeholders: collect(placeholders),
        }
    }

    /// Creates an `ObjectNotFound` error for a single id.
    pub fn object_not_found(id: impl Into<String>) -> Self {
        StorageError::ObjectNotFound {
            placeholders: vec![id.into()],
        }
    }

    /// Returns the symbolic kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::ServerFailure { .. } | StorageError::Backend(_) => {
                ErrorKind::ServerFailure
            }
            StorageError::InvalidFieldValue { .. } => ErrorKind::InvalidFieldValue,
            StorageError::InvalidPatch { .. } => ErrorKind::InvalidPatch,
            StorageError::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
        }
    }

    /// Returns the placeholder values carried by this error.
    ///
    /// Backend errors have no structured placeholders; their display text is
    /// returned as the single placeholder.
    pub fn placeholders(&self) -> Vec<String> {
        match self {
            StorageError::ServerFailure { placeholders }
            | StorageError::InvalidFieldValue { placeholders }
            | StorageError::InvalidPatch { placeholders }
            | StorageError::ObjectNotFound { placeholders } => placeholders.clone(),
            StorageError::Backend(e) => vec![e.to_string()],
        }
    }

    /// Returns the wrapped backend error, if any.
    pub fn as_backend(&self) -> Option<&BackendError> {
        match self {
            StorageError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors raised by the wire transport to the search cluster.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Every configured node failed or is marked dead.
    #[error("no living connections to {backend_name}: {message}")]
    NoLivingConnections {
        backend_name: String,
        message: String,
    },

    /// A request exceeded its client-side timeout.
    #[error("request timeout after {timeout_ms}ms on {backend_name}")]
    RequestTimeout {
        backend_name: String,
        timeout_ms: u64,
    },

    /// The cluster answered with a non-success HTTP status.
    #[error("{backend_name} returned status {status}: {message}")]
    Status {
        backend_name: String,
        status: u16,
        message: String,
    },

    /// The client could not be built or the node address is invalid.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// A request or response body could not be (de)serialized.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Connectivity faults that trigger background reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFault {
    /// No node in the pool is reachable.
    NoLivingConnections,
    /// A request timed out.
    RequestTimeout,
}

impl BackendError {
    /// Classifies this error as a connectivity fault, if it is one.
    pub fn fault(&self) -> Option<ConnectionFault> {
        match self {
            BackendError::NoLivingConnections { .. } => Some(ConnectionFault::NoLivingConnections),
            BackendError::RequestTimeout { .. } => Some(ConnectionFault::RequestTimeout),
            _ => None,
        }
    }

    /// Returns true if the connection loop should keep retrying after this error.
    pub fn is_retryable(&self) -> bool {
        self.fault().is_some()
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::SerializationError {
            message: err.to_string(),
        }
    }
}
