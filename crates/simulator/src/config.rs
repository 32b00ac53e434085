//! Configuration types for the simulator.

use std::time::Duration;

/// Delay after every fired tracking event.
///
/// Spreads tracking calls out so the backend is not hit with bursts and a
/// live run stays human-observable. Fixed; not part of [`SimulatorConfig`].
pub const EVENT_PACING_INTERVAL: Duration = Duration::from_millis(500);

/// Fallback variation passed to every evaluation.
///
/// A sentinel meaning "evaluation unavailable"; the executor never inspects it.
pub const FALLBACK_VARIATION: &str = "default";

/// Configuration for a simulator.
#[derive(Clone, Debug, Default)]
pub struct SimulatorConfig {
    /// Seed for the probability draws.
    ///
    /// `None` seeds from OS entropy. Identity keys are never derived from it.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    /// Create a new simulator configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the random seed for reproducible event firing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
