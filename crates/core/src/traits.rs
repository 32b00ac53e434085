//! Flagging backend capability.

use crate::{BackendError, FlagValue};
use async_trait::async_trait;
use flagsim_types::MultiContext;

/// A flagging and experimentation backend that simulations connect to.
///
/// The backend itself is stateless from the caller's point of view: every
/// call to [`connect`](FlaggingBackend::connect) hands out an independent
/// connection, so separate runs never share one.
///
/// # Example
///
/// ```ignore
/// let mut conn = backend.connect(spec.backend_credential()).await?;
/// let _ = conn.evaluate("new-checkout", &entity, FlagValue::from("default")).await;
/// conn.track("purchase", &entity).await?;
/// conn.flush().await?;
/// conn.close().await;
/// ```
#[async_trait]
pub trait FlaggingBackend: Send + Sync {
    /// Connection type handed out by this backend.
    ///
    /// Owned (`'static`) so an interrupted run can hand it to a background
    /// task for closing.
    type Connection: BackendConnection + 'static;

    /// Open a connection and wait until it is ready to serve evaluations.
    ///
    /// # Errors
    ///
    /// Fails if the credential is rejected, the backend is unreachable, or
    /// readiness is not reached within the backend's bounded wait.
    async fn connect(&self, credential: &str) -> Result<Self::Connection, BackendError>;
}

/// A live connection to a flagging backend.
///
/// A connection is owned by exactly one run and is never used concurrently.
#[async_trait]
pub trait BackendConnection: Send {
    /// Evaluate a flag for a composite identity.
    ///
    /// # Guarantees
    ///
    /// - **Infallible**: an unknown or unresolvable flag yields `fallback`
    /// - **No branching by callers needed**: the value is informational
    async fn evaluate(
        &mut self,
        flag_key: &str,
        context: &MultiContext,
        fallback: FlagValue,
    ) -> FlagValue;

    /// Record a named tracking event for a composite identity.
    ///
    /// The event may be buffered until the next [`flush`](Self::flush).
    async fn track(&mut self, event_name: &str, context: &MultiContext)
        -> Result<(), BackendError>;

    /// Deliver all buffered telemetry, blocking until it is sent or fails.
    async fn flush(&mut self) -> Result<(), BackendError>;

    /// Release the connection. Calling it more than once is a no-op.
    async fn close(&mut self);
}
