//! Buffering of analytics events between deliveries.
//!
//! Index, feature and custom events are kept in arrival order. Once the
//! buffer holds `capacity` of them it reports [`is_full`](EventBuffer::is_full)
//! and the connection delivers before going on; nothing is ever discarded.
//! Every evaluation is also folded into one summary event per window.

use crate::client::types::{FlagData, FlagSummary, OutputEvent, SummaryCounter};
use crate::eval::Detail;
use flagsim_core::FlagValue;
use flagsim_types::MultiContext;
use std::collections::{BTreeMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Kind-to-key map used to reference a context from feature and custom events.
pub fn context_keys(context: &MultiContext) -> BTreeMap<String, String> {
    context
        .kinds()
        .zip(context.keys())
        .map(|(kind, key)| (kind.to_string(), key.to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CounterKey {
    flag_key: String,
    variation: Option<usize>,
    version: Option<u64>,
}

#[derive(Debug, Clone)]
struct CounterEntry {
    value: FlagValue,
    count: u64,
}

/// Evaluation counters for the current window.
#[derive(Debug, Default)]
struct Summarizer {
    start_date: u64,
    end_date: u64,
    defaults: BTreeMap<String, FlagValue>,
    counters: BTreeMap<CounterKey, CounterEntry>,
}

impl Summarizer {
    fn record(
        &mut self,
        flag_key: &str,
        variation: Option<usize>,
        version: Option<u64>,
        value: &FlagValue,
        default: &FlagValue,
        timestamp: u64,
    ) {
        if self.counters.is_empty() {
            self.start_date = timestamp;
        }
        self.end_date = self.end_date.max(timestamp);

        self.defaults
            .entry(flag_key.to_string())
            .or_insert_with(|| default.clone());
        self.counters
            .entry(CounterKey {
                flag_key: flag_key.to_string(),
                variation,
                version,
            })
            .or_insert_with(|| CounterEntry {
                value: value.clone(),
                count: 0,
            })
            .count += 1;
    }

    fn to_event(&self) -> Option<OutputEvent> {
        if self.counters.is_empty() {
            return None;
        }

        let mut features: BTreeMap<String, FlagSummary> = BTreeMap::new();
        for (key, entry) in &self.counters {
            let summary = features
                .entry(key.flag_key.clone())
                .or_insert_with(|| FlagSummary {
                    default: self
                        .defaults
                        .get(&key.flag_key)
                        .cloned()
                        .unwrap_or(FlagValue::Null),
                    counters: Vec::new(),
                });
            summary.counters.push(SummaryCounter {
                value: entry.value.clone(),
                variation: key.variation,
                version: key.version,
                unknown: key.version.is_none().then_some(true),
                count: entry.count,
            });
        }

        Some(OutputEvent::Summary {
            start_date: self.start_date,
            end_date: self.end_date,
            features,
        })
    }
}

/// One evaluation as reported to [`EventBuffer::push_feature`].
#[derive(Debug, Clone, Copy)]
pub struct FeatureRecord<'a> {
    pub flag: &'a FlagData,
    pub detail: &'a Detail,
    pub value: &'a FlagValue,
    pub default: &'a FlagValue,
    pub prereq_of: Option<&'a str>,
}

/// Outgoing events waiting for the next delivery.
#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    events: Vec<OutputEvent>,
    summarizer: Summarizer,
    /// Contexts already sent in an index event this window.
    indexed: HashSet<String>,
}

impl EventBuffer {
    /// Create a buffer that asks for delivery at `capacity` queued events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Vec::new(),
            summarizer: Summarizer::default(),
            indexed: HashSet::new(),
        }
    }

    /// Queue an index event unless this context was already indexed.
    pub fn notice_context(&mut self, context: &MultiContext) {
        let fingerprint = context
            .keys()
            .map(|key| key.to_string())
            .collect::<Vec<_>>()
            .join(":");
        if self.indexed.insert(fingerprint) {
            self.events.push(OutputEvent::Index {
                creation_date: now_millis(),
                context: context.to_json(),
            });
        }
    }

    /// Queue a custom event, indexing its context first if needed.
    pub fn push_custom(&mut self, name: &str, context: &MultiContext) {
        self.notice_context(context);
        self.events.push(OutputEvent::Custom {
            creation_date: now_millis(),
            key: name.to_string(),
            context_keys: context_keys(context),
        });
    }

    /// Queue a full evaluation event.
    pub fn push_feature(&mut self, context: &MultiContext, record: FeatureRecord<'_>) {
        let FeatureRecord {
            flag,
            detail,
            value,
            default,
            prereq_of,
        } = record;

        self.events.push(OutputEvent::Feature {
            creation_date: now_millis(),
            key: flag.key.clone(),
            version: flag.version,
            context_keys: context_keys(context),
            variation: detail.variation,
            value: value.clone(),
            default: default.clone(),
            reason: detail
                .reason
                .in_experiment()
                .then(|| detail.reason.clone()),
            prereq_of: prereq_of.map(str::to_string),
        });
    }

    /// Count one evaluation. `version` is `None` for unknown flags.
    pub fn record_evaluation(
        &mut self,
        flag_key: &str,
        variation: Option<usize>,
        version: Option<u64>,
        value: &FlagValue,
        default: &FlagValue,
    ) {
        self.summarizer
            .record(flag_key, variation, version, value, default, now_millis());
    }

    /// Events waiting to be sent, not counting the summary.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Whether enough events are queued that they should be delivered now.
    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.summarizer.counters.is_empty()
    }

    /// Build the payload for the bulk endpoint: queued events then the summary.
    pub fn payload(&self) -> Vec<OutputEvent> {
        let mut payload = self.events.clone();
        payload.extend(self.summarizer.to_event());
        payload
    }

    /// Clear after a successful delivery.
    pub fn clear(&mut self) {
        self.events.clear();
        self.summarizer = Summarizer::default();
        self.indexed.clear();
    }
}
