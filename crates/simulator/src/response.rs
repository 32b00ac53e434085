//! Structured outcome returned to callers.

use crate::error::{ErrorKind, SimulationError};
use crate::metrics::SimulationReport;
use flagsim_types::SimulationSpec;
use serde::Serialize;

/// Message attached to a successful run.
pub const COMPLETE_MESSAGE: &str = "Simulation complete";

/// Message attached to a request that passed validation without running.
pub const VALID_MESSAGE: &str = "Request is valid";

/// What a validated request would do if run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPlan {
    pub flag_key: String,
    pub population: u64,
    pub events: Vec<String>,
    pub context_kinds: Vec<String>,
    /// Upper bound on tracking calls (population x events).
    pub max_tracking_calls: u64,
}

impl From<&SimulationSpec> for RunPlan {
    fn from(spec: &SimulationSpec) -> Self {
        Self {
            flag_key: spec.flag_key().to_string(),
            population: spec.population(),
            events: spec.event_specs().iter().map(|e| e.name.clone()).collect(),
            context_kinds: spec
                .context_templates()
                .iter()
                .map(|t| t.kind.clone())
                .collect(),
            max_tracking_calls: spec.max_tracking_calls(),
        }
    }
}

/// JSON-shaped result of a simulation request.
///
/// Success: `{"message": "Simulation complete", "report": {...}}`.
/// Validation only: `{"message": "Request is valid", "plan": {...}}`.
/// Failure: `{"error": "...", "kind": "validation", "violations": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SimulationResponse {
    Complete {
        message: String,
        report: SimulationReport,
    },
    Valid {
        message: String,
        plan: RunPlan,
    },
    Failed {
        error: String,
        kind: ErrorKind,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        violations: Vec<String>,
    },
}

impl SimulationResponse {
    /// Response for a request that validated and was not run.
    pub fn valid(spec: &SimulationSpec) -> Self {
        SimulationResponse::Valid {
            message: VALID_MESSAGE.to_string(),
            plan: RunPlan::from(spec),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, SimulationResponse::Failed { .. })
    }

    pub fn to_json_pretty(&self) -> String {
        // Only strings, integers and maps with string keys; cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl From<Result<SimulationReport, SimulationError>> for SimulationResponse {
    fn from(outcome: Result<SimulationReport, SimulationError>) -> Self {
        match outcome {
            Ok(report) => SimulationResponse::Complete {
                message: COMPLETE_MESSAGE.to_string(),
                report,
            },
            Err(err) => err.into(),
        }
    }
}

impl From<SimulationError> for SimulationResponse {
    fn from(err: SimulationError) -> Self {
        let violations = match &err {
            SimulationError::Validation(e) => {
                e.violations().iter().map(ToString::to_string).collect()
            }
            _ => Vec::new(),
        };

        SimulationResponse::Failed {
            error: err.to_string(),
            kind: err.kind(),
            violations,
        }
    }
}
