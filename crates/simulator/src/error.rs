//! Error types for simulation runs.

use flagsim_core::BackendError;
use flagsim_types::ValidationError;
use serde::Serialize;
use thiserror::Error;

/// Terminal error of a simulation run.
///
/// A run yields either a report or exactly one of these; there is no
/// partial-success shape. Entities processed before a `BackendCall` failure
/// are not rolled back.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The request was missing fields or malformed. No backend call was made.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backend connection could not be established.
    #[error("backend initialization failed: {0}")]
    BackendInit(#[source] BackendError),

    /// A tracking or flush call failed mid-run.
    #[error("backend call failed: {0}")]
    BackendCall(#[source] BackendError),
}

impl SimulationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimulationError::Validation(_) => ErrorKind::Validation,
            SimulationError::BackendInit(_) => ErrorKind::BackendInit,
            SimulationError::BackendCall(_) => ErrorKind::BackendCall,
        }
    }
}

/// Category of a [`SimulationError`], as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    BackendInit,
    BackendCall,
}
