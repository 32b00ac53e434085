//! HTTP flagging backend for flagsim.
//!
//! Implements [`flagsim_core::FlaggingBackend`] against a LaunchDarkly-style
//! service: flags are polled once per connection and evaluated locally
//! (targets, rules, prerequisites, percentage rollouts); analytics events are
//! buffered and delivered in bulk.

pub mod client;
pub mod config;
pub mod eval;
pub mod events;

pub use client::{HttpBackend, HttpConnection, EVENT_SCHEMA_HEADER, EVENT_SCHEMA_VERSION};
pub use config::ClientConfig;
pub use eval::{bucket_value, Detail, Evaluation, Evaluator, Reason};
pub use events::EventBuffer;
