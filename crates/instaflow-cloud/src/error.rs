//! Reconciliation error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised while reconciling a single remote resource.
///
/// Every variant is scoped to the resource being reconciled; nothing here
/// is fatal to the process.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Malformed identifier '{0}': expected exactly two non-empty segments separated by ':'")]
    MalformedIdentifier(String),

    #[error("{operation} returned HTTP {status}: {body}")]
    Gateway {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(
        "Timed out after {elapsed:?} waiting for {resource} (last status: {})",
        .last_status.as_deref().unwrap_or("none")
    )]
    WaitTimedOut {
        resource: String,
        last_status: Option<String>,
        elapsed: Duration,
    },

    #[error(
        "Waiting for {resource} failed after {elapsed:?}: {reason} (last status: {})",
        .last_status.as_deref().unwrap_or("none")
    )]
    WaitFailed {
        resource: String,
        reason: String,
        last_status: Option<String>,
        elapsed: Duration,
    },

    #[error("Wait for {resource} cancelled after {elapsed:?}")]
    WaitCancelled { resource: String, elapsed: Duration },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Build a gateway error from a non-success response.
    pub fn gateway(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        CloudError::Gateway {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
