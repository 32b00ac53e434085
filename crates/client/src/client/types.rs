//! Wire types for the flagging service.

use crate::eval::Reason;
use flagsim_core::FlagValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Response from the flag polling endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct AllData {
    #[serde(default)]
    pub flags: HashMap<String, FlagData>,
}

/// Flag configuration as served by the polling endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagData {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub variations: Vec<FlagValue>,
    #[serde(default)]
    pub off_variation: Option<usize>,
    #[serde(default)]
    pub fallthrough: VariationOrRollout,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    /// Individual `user` targets.
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Individual targets for any context kind.
    #[serde(default)]
    pub context_targets: Vec<Target>,
    #[serde(default)]
    pub rules: Vec<FlagRule>,
    #[serde(default)]
    pub salt: String,
    /// Send a full evaluation event for every evaluation.
    #[serde(default)]
    pub track_events: bool,
    /// Send a full evaluation event when the fallthrough is served.
    #[serde(default)]
    pub track_events_fallthrough: bool,
}

/// Either a fixed variation or a percentage rollout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariationOrRollout {
    #[serde(default)]
    pub variation: Option<usize>,
    #[serde(default)]
    pub rollout: Option<Rollout>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutKind {
    #[default]
    Rollout,
    Experiment,
}

/// Weighted split of contexts across variations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    #[serde(default)]
    pub kind: RolloutKind,
    /// Kind of the context whose key is bucketed. Defaults to `user`.
    #[serde(default)]
    pub context_kind: Option<String>,
    #[serde(default)]
    pub variations: Vec<WeightedVariation>,
    /// Attribute hashed instead of `key`. Ignored for experiments.
    #[serde(default)]
    pub bucket_by: Option<String>,
    #[serde(default)]
    pub seed: Option<i64>,
}

/// One slice of a rollout. Weights are in thousandths of a percent.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightedVariation {
    pub variation: usize,
    #[serde(default)]
    pub weight: u32,
    /// Excluded from experiment analysis.
    #[serde(default)]
    pub untracked: bool,
}

/// Another flag that must serve a given variation first.
#[derive(Debug, Clone, Deserialize)]
pub struct Prerequisite {
    pub key: String,
    pub variation: usize,
}

/// A list of context keys that receive one variation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub context_kind: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    pub variation: usize,
}

/// Targeting rule: all clauses must match.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    #[serde(flatten)]
    pub serve: VariationOrRollout,
    #[serde(default)]
    pub track_events: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    #[serde(default)]
    pub context_kind: Option<String>,
    pub attribute: String,
    pub op: Operator,
    #[serde(default)]
    pub values: Vec<FlagValue>,
    #[serde(default)]
    pub negate: bool,
}

/// Clause operators. Context attributes are strings, so only string
/// operators are evaluated; any other operator never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    In,
    StartsWith,
    EndsWith,
    Contains,
    #[serde(other)]
    Unsupported,
}

/// An analytics event as posted to the bulk endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum OutputEvent {
    /// Full context data, sent the first time a context is seen.
    #[serde(rename = "index", rename_all = "camelCase")]
    Index {
        creation_date: u64,
        context: serde_json::Value,
    },

    /// A single evaluation, sent for tracked flags, rules and experiments.
    #[serde(rename = "feature", rename_all = "camelCase")]
    Feature {
        creation_date: u64,
        key: String,
        version: u64,
        context_keys: BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        variation: Option<usize>,
        value: FlagValue,
        default: FlagValue,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<Reason>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prereq_of: Option<String>,
    },

    #[serde(rename = "custom", rename_all = "camelCase")]
    Custom {
        creation_date: u64,
        key: String,
        context_keys: BTreeMap<String, String>,
    },

    #[serde(rename = "summary", rename_all = "camelCase")]
    Summary {
        start_date: u64,
        end_date: u64,
        features: BTreeMap<String, FlagSummary>,
    },
}

/// Evaluation counters for one flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagSummary {
    pub default: FlagValue,
    pub counters: Vec<SummaryCounter>,
}

/// Number of times one variation of a flag was served.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryCounter {
    pub value: FlagValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown: Option<bool>,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flag_payload_parses_targeting() {
        let flag: FlagData = serde_json::from_value(json!({
            "key": "checkout", "version": 3, "on": true, "salt": "abc",
            "variations": ["control", "treatment"],
            "fallthrough": {
                "rollout": {
                    "kind": "experiment", "seed": 61,
                    "variations": [
                        {"variation": 0, "weight": 50000},
                        {"variation": 1, "weight": 50000, "untracked": true}
                    ]
                }
            },
            "rules": [{
                "id": "r1",
                "clauses": [{"attribute": "country", "op": "in", "values": ["US"]}],
                "variation": 1
            }, {
                "clauses": [{"attribute": "version", "op": "semVerEqual", "values": ["1.0.0"]}],
                "rollout": {"variations": [{"variation": 0, "weight": 100000}]},
                "trackEvents": true
            }],
            "contextTargets": [{"contextKind": "org", "values": ["o1"], "variation": 0}],
            "someFieldWeIgnore": {}
        }))
        .unwrap();

        let rollout = flag.fallthrough.rollout.unwrap();
        assert_eq!(rollout.kind, RolloutKind::Experiment);
        assert_eq!(rollout.seed, Some(61));
        assert!(rollout.variations[1].untracked);

        assert_eq!(flag.rules[0].id.as_deref(), Some("r1"));
        assert_eq!(flag.rules[0].serve.variation, Some(1));
        assert_eq!(flag.rules[0].clauses[0].op, Operator::In);
        assert_eq!(flag.rules[1].clauses[0].op, Operator::Unsupported);
        assert!(flag.rules[1].serve.rollout.is_some());
        assert!(flag.rules[1].track_events);
        assert_eq!(flag.context_targets[0].context_kind.as_deref(), Some("org"));
    }

    #[test]
    fn test_custom_event_json() {
        let event = OutputEvent::Custom {
            creation_date: 1_700_000_000_000,
            key: "purchase".into(),
            context_keys: BTreeMap::from([("user".to_string(), "u1".to_string())]),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "kind": "custom",
                "creationDate": 1_700_000_000_000u64,
                "key": "purchase",
                "contextKeys": {"user": "u1"},
            })
        );
    }

    #[test]
    fn test_feature_event_json_with_reason() {
        let event = OutputEvent::Feature {
            creation_date: 5,
            key: "checkout".into(),
            version: 3,
            context_keys: BTreeMap::from([("user".to_string(), "u1".to_string())]),
            variation: Some(1),
            value: json!("treatment"),
            default: json!("default"),
            reason: Some(Reason::Fallthrough { in_experiment: true }),
            prereq_of: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "kind": "feature",
                "creationDate": 5,
                "key": "checkout",
                "version": 3,
                "contextKeys": {"user": "u1"},
                "variation": 1,
                "value": "treatment",
                "default": "default",
                "reason": {"kind": "FALLTHROUGH", "inExperiment": true},
            })
        );
    }
}
