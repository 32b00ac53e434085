//! flagsim Simulator
//!
//! Drives synthetic traffic against a feature-flagging backend: for each
//! simulated entity it builds a multi-kind identity, requests one flag
//! evaluation, and fires configured tracking events with a fixed probability,
//! pacing each fired event. Buffered telemetry is flushed before the run ends.
//!
//! # Architecture
//!
//! - **Executor**: [`Simulator`] owns the run loop and the backend connection
//! - **Configuration**: [`SimulatorConfig`] (seeded draws); pacing is fixed
//! - **Metrics Collection**: totals per run, returned as [`SimulationReport`]
//! - **Caller surface**: [`SimulationResponse`] renders the outcome as JSON
//!
//! # Example
//!
//! ```ignore
//! use flagsim_simulator::{Simulator, SimulatorConfig};
//! use flagsim_client::{ClientConfig, HttpBackend};
//!
//! let backend = HttpBackend::new(ClientConfig::default())?;
//! let mut simulator = Simulator::new(backend, SimulatorConfig::new().with_seed(42));
//! let report = simulator.run_request(request).await?;
//!
//! println!("{}", report.summary());
//! eprint!("{}", report); // multi-line breakdown
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod response;
pub mod runner;

pub use config::{SimulatorConfig, EVENT_PACING_INTERVAL, FALLBACK_VARIATION};
pub use error::{ErrorKind, SimulationError};
pub use metrics::{MetricsCollector, SimulationReport};
pub use response::{RunPlan, SimulationResponse, COMPLETE_MESSAGE, VALID_MESSAGE};
pub use runner::Simulator;
