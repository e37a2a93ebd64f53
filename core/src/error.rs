//! Error types for the cancellation registry.
//!
//! Only [`RegistryError`] ever reaches callers: `Configuration` at construction
//! time, `NotFound` and `Contended` from `associate_operation`. [`StoreError`] and
//! [`HookError`] are produced by the collaborators and absorbed (logged) by the
//! registry so that a flaky store or a buggy hook cannot break request handling.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors surfaced by the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Invalid configuration, e.g. the distributed backend without a client.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No active entry exists for the request.
    #[error("No active request registered for id {request_id}")]
    NotFound {
        /// The request id that was looked up
        request_id: String,
    },

    /// Concurrent writers kept replacing the entry; the update was not applied.
    #[error("Request {request_id} changed concurrently too many times")]
    Contended {
        /// The request id whose entry could not be updated
        request_id: String,
    },
}

impl RegistryError {
    /// Shorthand for [`RegistryError::NotFound`].
    #[must_use]
    pub fn not_found(request_id: &str) -> Self {
        Self::NotFound {
            request_id: request_id.to_string(),
        }
    }
}

/// Failures of an entry store backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// An entry could not be encoded or decoded.
    #[error("Entry serialization failed: {0}")]
    Serialization(String),

    /// The backend rejected or failed a command.
    #[error("Store operation failed: {0}")]
    Backend(String),
}

/// Failures of a cancellation hook.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    /// The hook ran and failed.
    #[error("Cancellation hook failed: {0}")]
    Failed(String),

    /// The hook did not finish within the caller's deadline.
    #[error("Cancellation hook timed out after {0:?}")]
    TimedOut(Duration),
}

impl HookError {
    /// Wrap any displayable error as [`HookError::Failed`].
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}
