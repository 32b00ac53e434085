//! Run totals and the final report.

use flagsim_core::FlagValue;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Collects totals while a simulation runs.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    entities_processed: u64,
    evaluations: u64,
    events_fired: u64,
    events_by_name: BTreeMap<String, u64>,
    variations: BTreeMap<String, u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one flag evaluation and the value it produced.
    pub fn record_evaluation(&mut self, value: &FlagValue) {
        self.evaluations += 1;
        *self.variations.entry(value.to_string()).or_default() += 1;
    }

    /// Record one fired tracking event.
    pub fn record_event(&mut self, name: &str) {
        self.events_fired += 1;
        *self.events_by_name.entry(name.to_string()).or_default() += 1;
    }

    /// Record that an entity finished its evaluation and tracking cycle.
    pub fn record_entity(&mut self) {
        self.entities_processed += 1;
    }

    pub fn entities_processed(&self) -> u64 {
        self.entities_processed
    }

    pub fn events_fired(&self) -> u64 {
        self.events_fired
    }

    /// Finalize into a report.
    pub fn finish(self, elapsed: Duration) -> SimulationReport {
        SimulationReport {
            entities_processed: self.entities_processed,
            evaluations: self.evaluations,
            events_fired: self.events_fired,
            events_by_name: self.events_by_name,
            variations: self.variations,
            elapsed,
        }
    }
}

/// Summary of a completed simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    /// Entities that completed evaluation and tracking.
    pub entities_processed: u64,

    /// Flag evaluations issued.
    pub evaluations: u64,

    /// Tracking events sent.
    pub events_fired: u64,

    /// Tracking events sent, per event name.
    pub events_by_name: BTreeMap<String, u64>,

    /// Evaluation results, keyed by the JSON rendering of the value.
    pub variations: BTreeMap<String, u64>,

    /// Wall-clock duration of the run.
    #[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

impl SimulationReport {
    /// Events fired for one name.
    pub fn events_for(&self, name: &str) -> u64 {
        self.events_by_name.get(name).copied().unwrap_or(0)
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} entities, {} evaluations, {} events in {:.1}s",
            self.entities_processed,
            self.evaluations,
            self.events_fired,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Multi-line human-readable report.
impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Simulation Report ===")?;
        writeln!(f, "Entities processed: {}", self.entities_processed)?;
        writeln!(f, "Flag evaluations:   {}", self.evaluations)?;
        writeln!(f, "Events fired:       {}", self.events_fired)?;
        for (name, count) in &self.events_by_name {
            writeln!(f, "  {:<24} {}", name, count)?;
        }
        if !self.variations.is_empty() {
            writeln!(f, "Variations served:")?;
            for (value, count) in &self.variations {
                writeln!(f, "  {:<24} {}", value, count)?;
            }
        }
        writeln!(f, "Elapsed:            {:?}", self.elapsed)
    }
}
