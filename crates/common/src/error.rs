//! Error types for driftless

use thiserror::Error;

use crate::types::{LifecycleStatus, ResourceKind};

/// Result type alias using the driftless Error
pub type Result<T> = std::result::Result<T, Error>;

/// Convergence error taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced sibling resource does not exist. Raised before any mutation.
    #[error("Validation failed: referenced {kind} {id} does not exist")]
    Validation { kind: String, id: u64 },

    /// The resource is mid-transition or stuck in a state the engine will not touch.
    #[error("Lifecycle conflict on {kind} {id} (status {status}): {reason}")]
    LifecycleConflict {
        kind: ResourceKind,
        id: u64,
        status: LifecycleStatus,
        reason: String,
    },

    #[error("Remote call {operation} failed: {message}")]
    RemoteCall { operation: String, message: String },

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    /// A polled task completed with a non-empty error field.
    #[error("Async task {audit_id} failed: {message}")]
    AsyncTask { audit_id: String, message: String },

    #[error("Operation {operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Operation {operation} cancelled")]
    Cancelled { operation: String },

    #[error("Failed to decode response of {operation}: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RemoteCall {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn decode(operation: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Decode {
            operation: operation.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Failed remote calls and failed async tasks belong to the same class.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::RemoteCall { .. } | Error::AsyncTask { .. })
    }

    /// Errors the caller may retry later without changing its input.
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            Error::LifecycleConflict { .. } | Error::Timeout { .. } | Error::Cancelled { .. }
        )
    }
}
