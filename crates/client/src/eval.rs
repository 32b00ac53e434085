//! Local flag evaluation against a polled snapshot.
//!
//! Order of checks for a flag that is on:
//!
//! ```text
//! prerequisites ──► individual targets ──► rules (first match) ──► fallthrough
//! ```
//!
//! A flag that is off, or whose prerequisite fails, serves its off variation.
//! Rollouts bucket a context by hashing `"{flag}.{salt}.{key}"` (or
//! `"{seed}.{key}"` when the rollout carries a seed) with SHA-1; the first
//! 60 bits of the digest, scaled to `[0, 1)`, pick a slice of the weights.

use crate::client::types::{
    Clause, FlagData, Operator, Rollout, RolloutKind, Target, VariationOrRollout,
};
use flagsim_core::FlagValue;
use flagsim_types::{Context, MultiContext};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tracing::warn;

/// Context kind assumed when a target, clause or rollout names none.
pub const DEFAULT_CONTEXT_KIND: &str = "user";

/// Rollout weights are expressed out of this total.
const WEIGHT_SCALE: f64 = 100_000.0;

/// Largest value of a 60-bit bucket hash.
const BUCKET_SCALE: f64 = 0x0FFF_FFFF_FFFF_FFFF_u64 as f64;

/// Why a flag served the value it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Off,
    #[serde(rename_all = "camelCase")]
    Fallthrough {
        #[serde(skip_serializing_if = "is_false")]
        in_experiment: bool,
    },
    TargetMatch,
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        rule_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        rule_id: Option<String>,
        #[serde(skip_serializing_if = "is_false")]
        in_experiment: bool,
    },
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed { prerequisite_key: String },
    #[serde(rename_all = "camelCase")]
    Error { error_kind: EvalErrorKind },
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Reason {
    /// Whether the context was placed in an experiment.
    pub fn in_experiment(&self) -> bool {
        matches!(
            self,
            Reason::Fallthrough { in_experiment: true }
                | Reason::RuleMatch {
                    in_experiment: true,
                    ..
                }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvalErrorKind {
    /// Variation index out of range, empty rollout, or prerequisite cycle.
    MalformedFlag,
}

/// Result of evaluating one flag.
///
/// `value` is `None` when the flag serves no variation (off without an off
/// variation, or an error); the caller substitutes its fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Detail {
    pub value: Option<FlagValue>,
    pub variation: Option<usize>,
    pub reason: Reason,
}

impl Detail {
    fn error(kind: EvalErrorKind) -> Self {
        Self {
            value: None,
            variation: None,
            reason: Reason::Error { error_kind: kind },
        }
    }

    fn variation(flag: &FlagData, index: usize, reason: Reason) -> Self {
        match flag.variations.get(index) {
            Some(value) => Self {
                value: Some(value.clone()),
                variation: Some(index),
                reason,
            },
            None => {
                warn!(flag_key = %flag.key, index, "Variation index out of range");
                Self::error(EvalErrorKind::MalformedFlag)
            }
        }
    }

    fn off(flag: &FlagData, reason: Reason) -> Self {
        match flag.off_variation {
            Some(index) => Self::variation(flag, index, reason),
            None => Self {
                value: None,
                variation: None,
                reason,
            },
        }
    }
}

/// A prerequisite flag evaluated on the way to the requested one.
#[derive(Debug, Clone, PartialEq)]
pub struct PrerequisiteEval {
    pub flag_key: String,
    pub version: u64,
    pub detail: Detail,
    /// Key of the flag that depends on this one.
    pub prereq_of: String,
}

/// Outcome of [`Evaluator::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub detail: Detail,
    pub prerequisites: Vec<PrerequisiteEval>,
}

impl FlagData {
    /// Whether an evaluation with this reason is reported as a full event.
    pub fn is_tracked(&self, reason: &Reason) -> bool {
        if self.track_events || reason.in_experiment() {
            return true;
        }
        match reason {
            Reason::Fallthrough { .. } => self.track_events_fallthrough,
            Reason::RuleMatch { rule_index, .. } => self
                .rules
                .get(*rule_index)
                .is_some_and(|rule| rule.track_events),
            _ => false,
        }
    }
}

/// Evaluates flags from one snapshot.
pub struct Evaluator<'a> {
    flags: &'a HashMap<String, FlagData>,
}

impl<'a> Evaluator<'a> {
    pub fn new(flags: &'a HashMap<String, FlagData>) -> Self {
        Self { flags }
    }

    /// Evaluate `flag` for one composite identity.
    pub fn evaluate(&self, flag: &FlagData, context: &MultiContext) -> Evaluation {
        let mut prerequisites = Vec::new();
        let mut visiting = vec![flag.key.clone()];
        let detail = self.evaluate_flag(flag, context, &mut visiting, &mut prerequisites);
        Evaluation {
            detail,
            prerequisites,
        }
    }

    fn evaluate_flag(
        &self,
        flag: &FlagData,
        context: &MultiContext,
        visiting: &mut Vec<String>,
        prerequisites: &mut Vec<PrerequisiteEval>,
    ) -> Detail {
        if !flag.on {
            return Detail::off(flag, Reason::Off);
        }

        if let Err(detail) = self.check_prerequisites(flag, context, visiting, prerequisites) {
            return detail;
        }

        if let Some(index) = target_match(flag, context) {
            return Detail::variation(flag, index, Reason::TargetMatch);
        }

        for (rule_index, rule) in flag.rules.iter().enumerate() {
            if rule.clauses.iter().all(|c| clause_matches(c, context)) {
                return serve(flag, &rule.serve, context, |in_experiment| {
                    Reason::RuleMatch {
                        rule_index,
                        rule_id: rule.id.clone(),
                        in_experiment,
                    }
                });
            }
        }

        serve(flag, &flag.fallthrough, context, |in_experiment| {
            Reason::Fallthrough { in_experiment }
        })
    }

    /// `Err` carries the detail to serve when a prerequisite is not met.
    fn check_prerequisites(
        &self,
        flag: &FlagData,
        context: &MultiContext,
        visiting: &mut Vec<String>,
        prerequisites: &mut Vec<PrerequisiteEval>,
    ) -> Result<(), Detail> {
        for prereq in &flag.prerequisites {
            let failed = || {
                Detail::off(
                    flag,
                    Reason::PrerequisiteFailed {
                        prerequisite_key: prereq.key.clone(),
                    },
                )
            };

            if visiting.contains(&prereq.key) {
                warn!(flag_key = %flag.key, prerequisite = %prereq.key, "Prerequisite cycle");
                return Err(Detail::error(EvalErrorKind::MalformedFlag));
            }
            let Some(prereq_flag) = self.flags.get(&prereq.key) else {
                return Err(failed());
            };

            visiting.push(prereq.key.clone());
            let detail = self.evaluate_flag(prereq_flag, context, visiting, prerequisites);
            visiting.pop();

            if matches!(detail.reason, Reason::Error { .. }) {
                return Err(detail);
            }

            let satisfied = prereq_flag.on && detail.variation == Some(prereq.variation);
            prerequisites.push(PrerequisiteEval {
                flag_key: prereq.key.clone(),
                version: prereq_flag.version,
                detail,
                prereq_of: flag.key.clone(),
            });
            if !satisfied {
                return Err(failed());
            }
        }
        Ok(())
    }
}

/// Serve a fixed variation or a rollout slice.
fn serve(
    flag: &FlagData,
    serve: &VariationOrRollout,
    context: &MultiContext,
    reason: impl FnOnce(bool) -> Reason,
) -> Detail {
    if let Some(index) = serve.variation {
        return Detail::variation(flag, index, reason(false));
    }
    match serve
        .rollout
        .as_ref()
        .and_then(|rollout| rollout_variation(flag, rollout, context))
    {
        Some((index, in_experiment)) => Detail::variation(flag, index, reason(in_experiment)),
        None => {
            warn!(flag_key = %flag.key, "Neither variation nor rollout to serve");
            Detail::error(EvalErrorKind::MalformedFlag)
        }
    }
}

fn target_match(flag: &FlagData, context: &MultiContext) -> Option<usize> {
    if flag.context_targets.is_empty() {
        return flag
            .targets
            .iter()
            .find(|t| targets_context(t, DEFAULT_CONTEXT_KIND, context))
            .map(|t| t.variation);
    }

    for target in &flag.context_targets {
        let kind = target
            .context_kind
            .as_deref()
            .unwrap_or(DEFAULT_CONTEXT_KIND);
        // User keys stay in the legacy `targets` list; the entry here only
        // fixes their position in the order.
        let matched = if kind == DEFAULT_CONTEXT_KIND && target.values.is_empty() {
            flag.targets
                .iter()
                .filter(|t| t.variation == target.variation)
                .any(|t| targets_context(t, DEFAULT_CONTEXT_KIND, context))
        } else {
            targets_context(target, kind, context)
        };
        if matched {
            return Some(target.variation);
        }
    }
    None
}

fn targets_context(target: &Target, kind: &str, context: &MultiContext) -> bool {
    context.get(kind).is_some_and(|ctx| {
        let key = ctx.key().to_string();
        target.values.iter().any(|v| *v == key)
    })
}

fn clause_matches(clause: &Clause, context: &MultiContext) -> bool {
    let attribute = clause
        .attribute
        .strip_prefix('/')
        .unwrap_or(&clause.attribute);

    if attribute == "kind" {
        let matched = context.kinds().any(|k| values_match(clause, k.as_str()));
        return matched != clause.negate;
    }

    let kind = clause
        .context_kind
        .as_deref()
        .unwrap_or(DEFAULT_CONTEXT_KIND);
    let Some(ctx) = context.get(kind) else {
        return false;
    };
    match attribute_value(ctx, attribute) {
        Some(actual) => values_match(clause, &actual) != clause.negate,
        None => false,
    }
}

fn values_match(clause: &Clause, actual: &str) -> bool {
    clause
        .values
        .iter()
        .filter_map(FlagValue::as_str)
        .any(|expected| match clause.op {
            Operator::In => actual == expected,
            Operator::StartsWith => actual.starts_with(expected),
            Operator::EndsWith => actual.ends_with(expected),
            Operator::Contains => actual.contains(expected),
            Operator::Unsupported => false,
        })
}

fn attribute_value(ctx: &Context, attribute: &str) -> Option<String> {
    match attribute {
        "key" => Some(ctx.key().to_string()),
        name => ctx.attribute(name).map(str::to_string),
    }
}

/// Pick the rollout slice for a context. The flag is `in_experiment` only for
/// experiment rollouts where the bucketed context exists and the slice is
/// tracked.
fn rollout_variation(
    flag: &FlagData,
    rollout: &Rollout,
    context: &MultiContext,
) -> Option<(usize, bool)> {
    let last = rollout.variations.last()?;
    let experiment = rollout.kind == RolloutKind::Experiment;
    let kind = rollout
        .context_kind
        .as_deref()
        .unwrap_or(DEFAULT_CONTEXT_KIND);
    let attribute = match rollout.bucket_by.as_deref() {
        Some(attribute) if !experiment => attribute,
        _ => "key",
    };

    let (bucket, found) = match context.get(kind) {
        Some(ctx) => {
            let bucket = attribute_value(ctx, attribute)
                .map(|value| bucket_context(&flag.key, &flag.salt, rollout.seed, &value))
                .unwrap_or(0.0);
            (bucket, true)
        }
        None => (0.0, false),
    };

    let mut upper = 0.0;
    for slice in &rollout.variations {
        upper += f64::from(slice.weight) / WEIGHT_SCALE;
        if bucket < upper {
            return Some((slice.variation, experiment && found && !slice.untracked));
        }
    }
    // Weights summing short of the total leave the tail to the last slice.
    Some((last.variation, experiment && found && !last.untracked))
}

fn bucket_context(flag_key: &str, salt: &str, seed: Option<i64>, value: &str) -> f64 {
    let prefix = match seed {
        Some(seed) => seed.to_string(),
        None => format!("{}.{}", flag_key, salt),
    };
    bucket_value(&prefix, value)
}

/// Map `"{prefix}.{value}"` to a bucket in `[0, 1)`.
pub fn bucket_value(prefix: &str, value: &str) -> f64 {
    let digest = Sha1::digest(format!("{}.{}", prefix, value).as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    // First 15 hex digits of the digest.
    let hashed = u64::from_be_bytes(head) >> 4;
    hashed as f64 / BUCKET_SCALE
}
