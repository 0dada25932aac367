//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.
//! Idempotent terminal outcomes of the store (already exists, not found,
//! version conflict) are not errors; see [`crate::controller::store`].

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Status write kept losing the optimistic-concurrency race
    #[error("Status update conflicted {attempts} times")]
    Conflict { attempts: u32 },

    /// The pass did not finish before its deadline
    #[error("Reconciliation timed out after {0:?}")]
    Timeout(Duration),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an API client error, folding transport failures (connection
    /// resets, timeouts in the client stack) into [`Error::Transient`].
    pub fn from_api(error: kube::Error) -> Self {
        match error {
            kube::Error::Service(e) => Error::Transient(format!("API service error: {}", e)),
            kube::Error::HyperError(e) => Error::Transient(format!("API connection error: {}", e)),
            other => Error::Kube(other),
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, conflicts and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_) | Error::Conflict { .. } | Error::Timeout(_) => true,
            Error::Validation(_) | Error::MissingField(_) => false,
            Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error.
    ///
    /// Nothing is terminal: non-retryable errors are retried on a slow
    /// cadence so a fixed spec or API recovers without operator restart.
    pub fn requeue_after(&self) -> Duration {
        if self.is_conflict() {
            Duration::from_secs(1)
        } else if self.is_retryable() {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
