//! Simulation requests and validated simulation specs.
//!
//! A [`SimulationRequest`] is the loosely-typed wire shape a caller submits.
//! Every field is optional at parse time so that missing input surfaces as a
//! [`SpecViolation`] rather than an opaque parse error. [`SimulationRequest::validate`]
//! is the only way to obtain a [`SimulationSpec`].

use crate::identifiers::{ContextKind, RESERVED_ATTRIBUTES, RESERVED_KINDS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// One attribute of a context template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePair {
    pub key: String,
    pub value: String,
}

impl AttributePair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One facet of a composite identity, e.g. `user` or `org`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTemplate {
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<AttributePair>,
}

impl ContextTemplate {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    /// Add an attribute to the template.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(AttributePair::new(key, value));
        self
    }
}

/// A named tracking event and its per-entity firing probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub name: String,
    pub probability: f64,
}

impl EventSpec {
    pub fn new(name: impl Into<String>, probability: f64) -> Self {
        Self {
            name: name.into(),
            probability,
        }
    }
}

/// Simulation request as submitted by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    #[serde(default, alias = "sdkKey")]
    pub backend_credential: Option<String>,
    #[serde(default)]
    pub flag_key: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<EventSpec>>,
    #[serde(default)]
    pub user_count: Option<i64>,
    #[serde(default)]
    pub contexts: Option<Vec<ContextTemplate>>,
}

impl SimulationRequest {
    /// Parse a request from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::new(vec![SpecViolation::Malformed(e.to_string())]))
    }

    pub fn with_backend_credential(mut self, credential: impl Into<String>) -> Self {
        self.backend_credential = Some(credential.into());
        self
    }

    pub fn with_flag_key(mut self, flag_key: impl Into<String>) -> Self {
        self.flag_key = Some(flag_key.into());
        self
    }

    pub fn with_events(mut self, events: Vec<EventSpec>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_user_count(mut self, user_count: i64) -> Self {
        self.user_count = Some(user_count);
        self
    }

    pub fn with_contexts(mut self, contexts: Vec<ContextTemplate>) -> Self {
        self.contexts = Some(contexts);
        self
    }

    /// Validate the request and produce an immutable spec.
    ///
    /// All violations are collected, not just the first one.
    pub fn validate(self) -> Result<SimulationSpec, ValidationError> {
        let mut violations = Vec::new();

        let backend_credential = match self.backend_credential {
            Some(c) if !c.trim().is_empty() => Some(c),
            _ => {
                violations.push(SpecViolation::MissingCredential);
                None
            }
        };

        let flag_key = match self.flag_key {
            Some(k) if !k.trim().is_empty() => Some(k),
            _ => {
                violations.push(SpecViolation::MissingFlagKey);
                None
            }
        };

        let event_specs = match self.events {
            Some(events) if !events.is_empty() => {
                check_events(&events, &mut violations);
                Some(events)
            }
            _ => {
                violations.push(SpecViolation::MissingEvents);
                None
            }
        };

        let population = match self.user_count {
            Some(n) if n >= 0 => Some(n as u64),
            Some(n) => {
                violations.push(SpecViolation::NegativeUserCount(n));
                None
            }
            None => {
                violations.push(SpecViolation::MissingUserCount);
                None
            }
        };

        let context_templates = match self.contexts {
            Some(contexts) if !contexts.is_empty() => {
                check_contexts(&contexts, &mut violations);
                Some(contexts)
            }
            _ => {
                violations.push(SpecViolation::MissingContexts);
                None
            }
        };

        match (
            backend_credential,
            flag_key,
            event_specs,
            population,
            context_templates,
        ) {
            (
                Some(backend_credential),
                Some(flag_key),
                Some(event_specs),
                Some(population),
                Some(context_templates),
            ) if violations.is_empty() => Ok(SimulationSpec {
                backend_credential,
                flag_key,
                event_specs,
                population,
                context_templates,
            }),
            _ => Err(ValidationError::new(violations)),
        }
    }
}

fn check_events(events: &[EventSpec], violations: &mut Vec<SpecViolation>) {
    for (index, event) in events.iter().enumerate() {
        if event.name.trim().is_empty() {
            violations.push(SpecViolation::EmptyEventName { index });
        }
        let p = event.probability;
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            violations.push(SpecViolation::ProbabilityOutOfRange {
                name: event.name.clone(),
                probability: p,
            });
        }
    }
}

fn check_contexts(contexts: &[ContextTemplate], violations: &mut Vec<SpecViolation>) {
    let mut seen = HashSet::new();
    for (index, ctx) in contexts.iter().enumerate() {
        if ctx.kind.is_empty() {
            violations.push(SpecViolation::EmptyContextKind { index });
            continue;
        }
        if RESERVED_KINDS.contains(&ctx.kind.as_str()) {
            violations.push(SpecViolation::ReservedContextKind(ctx.kind.clone()));
        } else if !ContextKind::is_well_formed(&ctx.kind) {
            violations.push(SpecViolation::InvalidContextKind(ctx.kind.clone()));
        }
        if !seen.insert(ctx.kind.as_str()) {
            violations.push(SpecViolation::DuplicateContextKind(ctx.kind.clone()));
        }

        for attr in &ctx.attributes {
            if attr.key.is_empty() {
                violations.push(SpecViolation::EmptyAttributeKey {
                    kind: ctx.kind.clone(),
                });
            } else if RESERVED_ATTRIBUTES.contains(&attr.key.as_str()) {
                violations.push(SpecViolation::ReservedAttribute {
                    kind: ctx.kind.clone(),
                    attribute: attr.key.clone(),
                });
            }
        }
    }
}

/// A validated simulation spec. Immutable once built.
#[derive(Clone, PartialEq)]
pub struct SimulationSpec {
    backend_credential: String,
    flag_key: String,
    event_specs: Vec<EventSpec>,
    population: u64,
    context_templates: Vec<ContextTemplate>,
}

impl SimulationSpec {
    pub fn backend_credential(&self) -> &str {
        &self.backend_credential
    }

    pub fn flag_key(&self) -> &str {
        &self.flag_key
    }

    pub fn event_specs(&self) -> &[EventSpec] {
        &self.event_specs
    }

    /// Number of simulated entities.
    pub fn population(&self) -> u64 {
        self.population
    }

    pub fn context_templates(&self) -> &[ContextTemplate] {
        &self.context_templates
    }

    /// Upper bound on tracking calls for one run.
    pub fn max_tracking_calls(&self) -> u64 {
        self.population
            .saturating_mul(self.event_specs.len() as u64)
    }
}

// Keeps the credential out of logs.
impl fmt::Debug for SimulationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationSpec")
            .field("backend_credential", &"<redacted>")
            .field("flag_key", &self.flag_key)
            .field("event_specs", &self.event_specs)
            .field("population", &self.population)
            .field("context_templates", &self.context_templates)
            .finish()
    }
}

/// A single problem found while validating a request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecViolation {
    #[error("request is not valid JSON: {0}")]
    Malformed(String),

    #[error("missing backend credential")]
    MissingCredential,

    #[error("missing flag key")]
    MissingFlagKey,

    #[error("missing events")]
    MissingEvents,

    #[error("missing user count")]
    MissingUserCount,

    #[error("user count must not be negative (got {0})")]
    NegativeUserCount(i64),

    #[error("missing contexts")]
    MissingContexts,

    #[error("event #{index} has an empty name")]
    EmptyEventName { index: usize },

    #[error("event '{name}' has probability {probability} outside [0, 1]")]
    ProbabilityOutOfRange { name: String, probability: f64 },

    #[error("context #{index} has an empty kind")]
    EmptyContextKind { index: usize },

    #[error("context kind '{0}' is reserved")]
    ReservedContextKind(String),

    #[error("context kind '{0}' contains characters other than letters, digits, '.', '_' and '-'")]
    InvalidContextKind(String),

    #[error("context kind '{0}' appears more than once")]
    DuplicateContextKind(String),

    #[error("context '{kind}' has an attribute with an empty key")]
    EmptyAttributeKey { kind: String },

    #[error("context '{kind}' uses reserved attribute '{attribute}'")]
    ReservedAttribute { kind: String, attribute: String },
}

/// A request failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Missing required fields or malformed input: {}", join_violations(.violations))]
pub struct ValidationError {
    violations: Vec<SpecViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<SpecViolation>) -> Self {
        Self { violations }
    }

    /// All violations found, in field order.
    pub fn violations(&self) -> &[SpecViolation] {
        &self.violations
    }

    /// Check whether a given violation was reported.
    pub fn contains(&self, violation: &SpecViolation) -> bool {
        self.violations.contains(violation)
    }
}

fn join_violations(violations: &[SpecViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> SimulationRequest {
        SimulationRequest::default()
            .with_backend_credential("sdk-123")
            .with_flag_key("new-checkout")
            .with_events(vec![EventSpec::new("purchase", 0.5)])
            .with_user_count(10)
            .with_contexts(vec![ContextTemplate::new("user").with_attribute("country", "US")])
    }

    #[test]
    fn test_valid_request_builds_spec() {
        let spec = valid_request().validate().unwrap();
        assert_eq!(spec.backend_credential(), "sdk-123");
        assert_eq!(spec.flag_key(), "new-checkout");
        assert_eq!(spec.population(), 10);
        assert_eq!(spec.event_specs().len(), 1);
        assert_eq!(spec.context_templates()[0].kind, "user");
        assert_eq!(spec.max_tracking_calls(), 10);
    }

    #[test]
    fn test_zero_population_is_valid() {
        let spec = valid_request().with_user_count(0).validate().unwrap();
        assert_eq!(spec.population(), 0);
    }

    #[test]
    fn test_each_missing_field_is_reported() {
        for field in ["backendCredential", "flagKey", "events", "userCount", "contexts"] {
            let mut request = valid_request();
            let expected = match field {
                "backendCredential" => {
                    request.backend_credential = None;
                    SpecViolation::MissingCredential
                }
                "flagKey" => {
                    request.flag_key = None;
                    SpecViolation::MissingFlagKey
                }
                "events" => {
                    request.events = None;
                    SpecViolation::MissingEvents
                }
                "userCount" => {
                    request.user_count = None;
                    SpecViolation::MissingUserCount
                }
                _ => {
                    request.contexts = None;
                    SpecViolation::MissingContexts
                }
            };

            let err = request.validate().unwrap_err();
            assert_eq!(err.violations(), &[expected], "omitting {field}");
        }
    }

    #[test]
    fn test_empty_collections_and_strings_are_missing() {
        let err = SimulationRequest::default()
            .with_backend_credential("  ")
            .with_flag_key("")
            .with_events(vec![])
            .with_user_count(1)
            .with_contexts(vec![])
            .validate()
            .unwrap_err();

        assert_eq!(
            err.violations(),
            &[
                SpecViolation::MissingCredential,
                SpecViolation::MissingFlagKey,
                SpecViolation::MissingEvents,
                SpecViolation::MissingContexts,
            ]
        );
    }

    #[test]
    fn test_negative_user_count() {
        let err = valid_request().with_user_count(-3).validate().unwrap_err();
        assert!(err.contains(&SpecViolation::NegativeUserCount(-3)));
    }

    #[test]
    fn test_probability_bounds() {
        for p in [-0.1, 1.5, f64::NAN, f64::INFINITY] {
            let err = valid_request()
                .with_events(vec![EventSpec::new("purchase", p)])
                .validate()
                .unwrap_err();
            assert!(matches!(
                err.violations(),
                [SpecViolation::ProbabilityOutOfRange { .. }]
            ));
        }

        for p in [0.0, 1.0] {
            assert!(valid_request()
                .with_events(vec![EventSpec::new("purchase", p)])
                .validate()
                .is_ok());
        }
    }

    #[test]
    fn test_context_kind_rules() {
        let err = valid_request()
            .with_contexts(vec![
                ContextTemplate::new("user"),
                ContextTemplate::new("user"),
                ContextTemplate::new(""),
                ContextTemplate::new("multi"),
                ContextTemplate::new("my org"),
                ContextTemplate::new("kind"),
            ])
            .validate()
            .unwrap_err();

        assert_eq!(
            err.violations(),
            &[
                SpecViolation::DuplicateContextKind("user".into()),
                SpecViolation::EmptyContextKind { index: 2 },
                SpecViolation::ReservedContextKind("multi".into()),
                SpecViolation::InvalidContextKind("my org".into()),
                SpecViolation::ReservedContextKind("kind".into()),
            ]
        );
    }

    #[test]
    fn test_reserved_attribute_rejected() {
        let err = valid_request()
            .with_contexts(vec![ContextTemplate::new("user")
                .with_attribute("key", "fixed")
                .with_attribute("", "x")])
            .validate()
            .unwrap_err();

        assert_eq!(
            err.violations(),
            &[
                SpecViolation::ReservedAttribute {
                    kind: "user".into(),
                    attribute: "key".into()
                },
                SpecViolation::EmptyAttributeKey {
                    kind: "user".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_wire_request() {
        let json = r#"{
            "sdkKey": "sdk-abc",
            "flagKey": "banner",
            "events": [{"name": "click", "probability": 0.25}],
            "userCount": 3,
            "contexts": [{"kind": "user", "attributes": [{"key": "plan", "value": "pro"}]}]
        }"#;

        let spec = SimulationRequest::from_json(json)
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(spec.backend_credential(), "sdk-abc");
        assert_eq!(spec.event_specs()[0], EventSpec::new("click", 0.25));
        assert_eq!(
            spec.context_templates()[0].attributes,
            vec![AttributePair::new("plan", "pro")]
        );
    }

    #[test]
    fn test_parse_canonical_field_name() {
        let request =
            SimulationRequest::from_json(r#"{"backendCredential": "sdk-1", "userCount": 0}"#)
                .unwrap();
        assert_eq!(request.backend_credential.as_deref(), Some("sdk-1"));
        assert_eq!(request.user_count, Some(0));
    }

    #[test]
    fn test_malformed_json() {
        let err = SimulationRequest::from_json("{not json").unwrap_err();
        assert!(matches!(err.violations(), [SpecViolation::Malformed(_)]));
    }

    #[test]
    fn test_debug_redacts_credential() {
        let spec = valid_request().validate().unwrap();
        let debug = format!("{:?}", spec);
        assert!(!debug.contains("sdk-123"));
        assert!(debug.contains("<redacted>"));
    }
}
