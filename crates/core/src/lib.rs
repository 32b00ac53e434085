//! Core contract for flagsim.
//!
//! Simulations reach a flagging backend only through the two traits defined
//! here, which keeps the executor independent of any concrete SDK or wire
//! protocol:
//!
//! - [`FlaggingBackend`]: hands out connections for a credential
//! - [`BackendConnection`]: evaluate, track, flush, close

mod error;
mod traits;

pub use error::BackendError;
pub use traits::{BackendConnection, FlaggingBackend};

/// A flag variation value as returned by the backend.
pub type FlagValue = serde_json::Value;
