//! Core data model for flagsim.
//!
//! This crate defines the inputs of a simulation and the identities it
//! produces:
//!
//! - [`SimulationRequest`]: the JSON-shaped request a caller submits
//! - [`SimulationSpec`]: a validated, immutable spec (only built by validation)
//! - [`ContextTemplate`] / [`EventSpec`]: the facets and events of a run
//! - [`MultiContext`]: the composite identity of one simulated entity

mod context;
mod identifiers;
mod spec;

pub use context::{Context, MultiContext};
pub use identifiers::{ContextKey, ContextKind, MULTI_KIND, RESERVED_ATTRIBUTES, RESERVED_KINDS};
pub use spec::{
    AttributePair, ContextTemplate, EventSpec, SimulationRequest, SimulationSpec, SpecViolation,
    ValidationError,
};
