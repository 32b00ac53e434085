//! Error types for backend calls.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a flagging backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The credential was rejected.
    #[error("backend rejected the credential")]
    Unauthorized,

    /// The backend could not be reached or answered with an error.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend did not become ready in time.
    #[error("backend not ready after {0:?}")]
    NotReady(Duration),

    /// Buffered events could not be delivered.
    #[error("event delivery failed: {0}")]
    Delivery(String),

    /// The connection was already closed.
    #[error("connection is closed")]
    Closed,
}
