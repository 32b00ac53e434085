//! Test helpers for flagsim.
//!
//! Provides [`RecordingBackend`], an in-memory [`FlaggingBackend`] that logs
//! every call in order and can be told to fail at connect, track or flush.
//! Clones share the same log, so a test keeps one handle for assertions and
//! hands another to the code under test.

use async_trait::async_trait;
use flagsim_core::{BackendConnection, BackendError, FlagValue, FlaggingBackend};
use flagsim_types::{ContextKey, MultiContext};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One call observed by the recording backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Connect {
        credential: String,
    },
    Evaluate {
        flag_key: String,
        context: MultiContext,
        fallback: FlagValue,
    },
    Track {
        event_name: String,
        context: MultiContext,
    },
    Flush,
    Close,
}

#[derive(Debug, Default)]
struct Faults {
    connect: Option<BackendError>,
    flush: Option<BackendError>,
    /// Number of successful tracks allowed before tracking fails.
    track_after: Option<(usize, BackendError)>,
    flags: HashMap<String, FlagValue>,
}

#[derive(Debug, Default)]
struct Shared {
    calls: Mutex<Vec<BackendCall>>,
    faults: Mutex<Faults>,
}

/// In-memory backend that records every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    shared: Arc<Shared>,
}

impl RecordingBackend {
    /// Create a backend that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every connect with the given error.
    pub fn failing_connect(self, error: BackendError) -> Self {
        self.shared.faults.lock().connect = Some(error);
        self
    }

    /// Fail every flush with the given error.
    pub fn failing_flush(self, error: BackendError) -> Self {
        self.shared.faults.lock().flush = Some(error);
        self
    }

    /// Let `successes` tracks through, then fail every later one.
    pub fn failing_track_after(self, successes: usize, error: BackendError) -> Self {
        self.shared.faults.lock().track_after = Some((successes, error));
        self
    }

    /// Resolve a flag to a fixed value instead of the fallback.
    pub fn with_flag(self, flag_key: impl Into<String>, value: FlagValue) -> Self {
        self.shared.faults.lock().flags.insert(flag_key.into(), value);
        self
    }

    /// All calls seen so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.shared.calls.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Connect { .. }))
    }

    pub fn evaluation_count(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Evaluate { .. }))
    }

    pub fn track_count(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Track { .. }))
    }

    /// Number of tracks recorded for one event name.
    pub fn track_count_for(&self, event_name: &str) -> usize {
        self.count(|c| matches!(c, BackendCall::Track { event_name: n, .. } if n == event_name))
    }

    pub fn flush_count(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Flush))
    }

    pub fn close_count(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Close))
    }

    /// Contexts passed to evaluate, in order.
    pub fn evaluated_contexts(&self) -> Vec<MultiContext> {
        self.shared
            .calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                BackendCall::Evaluate { context, .. } => Some(context.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(event name, context)` for every track, in order.
    pub fn tracked(&self) -> Vec<(String, MultiContext)> {
        self.shared
            .calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                BackendCall::Track {
                    event_name,
                    context,
                } => Some((event_name.clone(), context.clone())),
                _ => None,
            })
            .collect()
    }

    /// Every identity key that reached evaluate.
    pub fn evaluated_keys(&self) -> Vec<ContextKey> {
        self.evaluated_contexts()
            .iter()
            .flat_map(|ctx| ctx.keys().collect::<Vec<_>>())
            .collect()
    }

    fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.shared.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: BackendCall) {
        self.shared.calls.lock().push(call);
    }
}

#[async_trait]
impl FlaggingBackend for RecordingBackend {
    type Connection = RecordingConnection;

    async fn connect(&self, credential: &str) -> Result<Self::Connection, BackendError> {
        self.record(BackendCall::Connect {
            credential: credential.to_string(),
        });

        if let Some(err) = self.shared.faults.lock().connect.clone() {
            return Err(err);
        }

        Ok(RecordingConnection {
            backend: self.clone(),
            tracks: 0,
            closed: false,
        })
    }
}

/// Connection handed out by [`RecordingBackend`].
#[derive(Debug)]
pub struct RecordingConnection {
    backend: RecordingBackend,
    tracks: usize,
    closed: bool,
}

impl RecordingConnection {
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl BackendConnection for RecordingConnection {
    async fn evaluate(
        &mut self,
        flag_key: &str,
        context: &MultiContext,
        fallback: FlagValue,
    ) -> FlagValue {
        self.backend.record(BackendCall::Evaluate {
            flag_key: flag_key.to_string(),
            context: context.clone(),
            fallback: fallback.clone(),
        });

        let faults = self.backend.shared.faults.lock();
        match faults.flags.get(flag_key) {
            Some(value) if !self.closed => value.clone(),
            _ => fallback,
        }
    }

    async fn track(
        &mut self,
        event_name: &str,
        context: &MultiContext,
    ) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }

        if let Some((successes, err)) = &self.backend.shared.faults.lock().track_after {
            if self.tracks >= *successes {
                return Err(err.clone());
            }
        }

        self.tracks += 1;
        self.backend.record(BackendCall::Track {
            event_name: event_name.to_string(),
            context: context.clone(),
        });
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }

        self.backend.record(BackendCall::Flush);
        match self.backend.shared.faults.lock().flush.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.backend.record(BackendCall::Close);
        self.closed = true;
    }
}
