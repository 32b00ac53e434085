//! Simulation executor.
//!
//! Turns a [`SimulationSpec`] into a sequence of backend calls:
//!
//! ```text
//! connect ──► for each entity ──► build MultiContext
//!                    │            evaluate(flag, ctx, fallback)
//!                    │            for each event: draw < p ? track + pace
//!                    ▼
//!                 flush ──► close (on every exit path after connect)
//! ```
//!
//! Entities are processed strictly in index order on a single task.

use crate::config::{SimulatorConfig, EVENT_PACING_INTERVAL, FALLBACK_VARIATION};
use crate::error::SimulationError;
use crate::metrics::{MetricsCollector, SimulationReport};
use flagsim_core::{BackendConnection, FlagValue, FlaggingBackend};
use flagsim_types::{MultiContext, SimulationRequest, SimulationSpec};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Runs simulations against a flagging backend.
///
/// The backend hands out a fresh connection per run, so one simulator can
/// execute several specs back to back.
pub struct Simulator<B: FlaggingBackend> {
    backend: B,
    rng: ChaCha8Rng,
}

impl<B: FlaggingBackend> Simulator<B> {
    /// Create a simulator over a backend.
    pub fn new(backend: B, config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { backend, rng }
    }

    /// Get the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Validate a request, then run it.
    ///
    /// Validation failures return before any backend call.
    pub async fn run_request(
        &mut self,
        request: SimulationRequest,
    ) -> Result<SimulationReport, SimulationError> {
        let spec = request.validate()?;
        self.run(&spec).await
    }

    /// Run a validated spec to completion.
    ///
    /// Opens one connection, processes `population` entities, flushes, and
    /// closes the connection exactly once whether or not the run succeeded.
    /// If the run panics or this future is dropped mid-run, the connection is
    /// closed on a spawned task instead, so the close may land after the
    /// caller has moved on.
    pub async fn run(&mut self, spec: &SimulationSpec) -> Result<SimulationReport, SimulationError> {
        let started = Instant::now();
        info!(
            flag_key = spec.flag_key(),
            population = spec.population(),
            events = spec.event_specs().len(),
            contexts = spec.context_templates().len(),
            "Starting simulation"
        );

        let conn = self
            .backend
            .connect(spec.backend_credential())
            .await
            .map_err(SimulationError::BackendInit)?;
        debug!("Backend connection ready");

        let mut guard = ConnectionGuard::new(conn);
        let outcome = self.drive(guard.connection(), spec).await;
        guard.release().await;

        let report = outcome?.finish(started.elapsed());
        info!(
            entities = report.entities_processed,
            evaluations = report.evaluations,
            events_fired = report.events_fired,
            elapsed = ?report.elapsed,
            "Simulation complete"
        );
        Ok(report)
    }

    /// Process every entity, then flush.
    async fn drive(
        &mut self,
        conn: &mut B::Connection,
        spec: &SimulationSpec,
    ) -> Result<MetricsCollector, SimulationError> {
        let mut metrics = MetricsCollector::new();

        for index in 0..spec.population() {
            if let Err(e) = self.simulate_entity(conn, spec, index, &mut metrics).await {
                warn!(
                    index,
                    entities = metrics.entities_processed(),
                    events_fired = metrics.events_fired(),
                    error = %e,
                    "Simulation aborted"
                );
                return Err(e);
            }
        }

        info!(events_fired = metrics.events_fired(), "Flushing events");
        if let Err(e) = conn.flush().await {
            warn!(error = %e, "Flush failed");
            return Err(SimulationError::BackendCall(e));
        }

        Ok(metrics)
    }

    /// One evaluation and tracking cycle for entity `index`.
    async fn simulate_entity(
        &mut self,
        conn: &mut B::Connection,
        spec: &SimulationSpec,
        index: u64,
        metrics: &mut MetricsCollector,
    ) -> Result<(), SimulationError> {
        let entity = MultiContext::generate(spec.context_templates());
        debug!(index, context = %entity.to_json(), "Built entity");

        let value = conn
            .evaluate(
                spec.flag_key(),
                &entity,
                FlagValue::from(FALLBACK_VARIATION),
            )
            .await;
        debug!(index, value = %value, "Evaluated flag");
        metrics.record_evaluation(&value);

        for event in spec.event_specs() {
            let draw: f64 = self.rng.gen();
            if draw >= event.probability {
                continue;
            }

            conn.track(&event.name, &entity)
                .await
                .map_err(SimulationError::BackendCall)?;
            metrics.record_event(&event.name);
            debug!(index, event = %event.name, "Sent event");

            tokio::time::sleep(EVENT_PACING_INTERVAL).await;
        }

        metrics.record_entity();
        Ok(())
    }
}

/// Owns the run's connection so that it is closed on every exit path.
///
/// [`release`](Self::release) closes it in line. If the guard is dropped
/// first (panic, cancelled future), the connection moves to a spawned task
/// that closes it. Outside a Tokio runtime it can only be dropped.
struct ConnectionGuard<C: BackendConnection + 'static> {
    conn: Option<C>,
}

impl<C: BackendConnection + 'static> ConnectionGuard<C> {
    fn new(conn: C) -> Self {
        Self { conn: Some(conn) }
    }

    fn connection(&mut self) -> &mut C {
        self.conn
            .as_mut()
            .expect("connection is only taken by release or drop")
    }

    async fn release(mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
    }
}

impl<C: BackendConnection + 'static> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Run interrupted, closing backend connection in the background");
                handle.spawn(async move {
                    conn.close().await;
                });
            }
            Err(_) => warn!("Run interrupted outside a runtime, connection dropped unclosed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagsim_core::BackendError;
    use flagsim_test_helpers::RecordingBackend;
    use flagsim_types::{ContextTemplate, EventSpec, SpecViolation};
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use tracing_test::traced_test;

    fn request(population: i64, events: Vec<EventSpec>) -> SimulationRequest {
        SimulationRequest::default()
            .with_backend_credential("sdk-test")
            .with_flag_key("new-checkout")
            .with_events(events)
            .with_user_count(population)
            .with_contexts(vec![
                ContextTemplate::new("user").with_attribute("country", "US")
            ])
    }

    fn simulator(backend: &RecordingBackend) -> Simulator<RecordingBackend> {
        Simulator::new(backend.clone(), SimulatorConfig::new().with_seed(7))
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_population_is_a_no_op_run() {
        let backend = RecordingBackend::new();
        let report = assert_ok!(
            simulator(&backend)
                .run_request(request(0, vec![EventSpec::new("purchase", 1.0)]))
                .await
        );

        assert_eq!(report.entities_processed, 0);
        assert_eq!(backend.connect_count(), 1);
        assert_eq!(backend.evaluation_count(), 0);
        assert_eq!(backend.track_count(), 0);
        assert_eq!(backend.flush_count(), 1);
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_scenario() {
        let backend = RecordingBackend::new();
        let report = assert_ok!(
            simulator(&backend)
                .run_request(request(2, vec![EventSpec::new("purchase", 1.0)]))
                .await
        );

        assert_eq!(backend.evaluation_count(), 2);
        assert_eq!(backend.track_count_for("purchase"), 2);
        assert_eq!(report.events_for("purchase"), 2);

        let tracked = backend.tracked();
        let keys: HashSet<_> = tracked
            .iter()
            .map(|(_, ctx)| ctx.get("user").unwrap().key())
            .collect();
        assert_eq!(keys.len(), 2);
        for (name, ctx) in &tracked {
            assert_eq!(name, "purchase");
            assert_eq!(ctx.get("user").unwrap().attribute("country"), Some("US"));
        }

        // Each entity is tracked with the identity it was evaluated with.
        assert_eq!(
            backend.evaluated_contexts(),
            tracked.into_iter().map(|(_, ctx)| ctx).collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluation_count_matches_population() {
        let backend = RecordingBackend::new();
        let report = assert_ok!(
            simulator(&backend)
                .run_request(request(37, vec![EventSpec::new("view", 0.3)]))
                .await
        );

        assert_eq!(backend.evaluation_count(), 37);
        assert_eq!(report.evaluations, 37);
        assert_eq!(report.entities_processed, 37);
        assert_eq!(report.variations.get("\"default\""), Some(&37));
    }

    #[tokio::test(start_paused = true)]
    async fn test_certain_and_impossible_events() {
        let backend = RecordingBackend::new();
        assert_ok!(
            simulator(&backend)
                .run_request(request(
                    25,
                    vec![
                        EventSpec::new("always", 1.0),
                        EventSpec::new("never", 0.0),
                    ],
                ))
                .await
        );

        assert_eq!(backend.track_count_for("always"), 25);
        assert_eq!(backend.track_count_for("never"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_keys_unique_across_run() {
        let backend = RecordingBackend::new();
        let req = request(300, vec![EventSpec::new("never", 0.0)]).with_contexts(vec![
            ContextTemplate::new("user"),
            ContextTemplate::new("org").with_attribute("tier", "gold"),
            ContextTemplate::new("device"),
        ]);
        assert_ok!(simulator(&backend).run_request(req).await);

        let keys = backend.evaluated_keys();
        assert_eq!(keys.len(), 900);
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), 900);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluation_uses_fallback_sentinel() {
        let backend = RecordingBackend::new().with_flag("new-checkout", json!("treatment"));
        let report = assert_ok!(
            simulator(&backend)
                .run_request(request(3, vec![EventSpec::new("never", 0.0)]))
                .await
        );

        for call in backend.calls() {
            if let flagsim_test_helpers::BackendCall::Evaluate {
                flag_key, fallback, ..
            } = call
            {
                assert_eq!(flag_key, "new-checkout");
                assert_eq!(fallback, json!(FALLBACK_VARIATION));
            }
        }
        assert_eq!(report.variations.get("\"treatment\""), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_fields_make_no_backend_calls() {
        let full = request(5, vec![EventSpec::new("purchase", 1.0)]);
        let omissions: Vec<SimulationRequest> = vec![
            SimulationRequest {
                backend_credential: None,
                ..full.clone()
            },
            SimulationRequest {
                flag_key: None,
                ..full.clone()
            },
            SimulationRequest {
                events: None,
                ..full.clone()
            },
            SimulationRequest {
                user_count: None,
                ..full.clone()
            },
            SimulationRequest {
                contexts: None,
                ..full
            },
        ];

        for req in omissions {
            let backend = RecordingBackend::new();
            let err = assert_err!(simulator(&backend).run_request(req).await);
            assert!(matches!(err, SimulationError::Validation(_)));
            assert!(backend.calls().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_lists_violation() {
        let backend = RecordingBackend::new();
        let req = request(-1, vec![EventSpec::new("purchase", 1.0)]);
        match simulator(&backend).run_request(req).await {
            Err(SimulationError::Validation(e)) => {
                assert!(e.contains(&SpecViolation::NegativeUserCount(-1)));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_backend_init_error() {
        let backend = RecordingBackend::new().failing_connect(BackendError::Unauthorized);
        let err = assert_err!(
            simulator(&backend)
                .run_request(request(4, vec![EventSpec::new("purchase", 1.0)]))
                .await
        );

        assert!(matches!(
            err,
            SimulationError::BackendInit(BackendError::Unauthorized)
        ));
        assert_eq!(backend.connect_count(), 1);
        assert_eq!(backend.evaluation_count(), 0);
        assert_eq!(backend.track_count(), 0);
        assert_eq!(backend.close_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_failure_still_closes_once() {
        let backend =
            RecordingBackend::new().failing_flush(BackendError::Delivery("503".into()));
        let err = assert_err!(
            simulator(&backend)
                .run_request(request(3, vec![EventSpec::new("purchase", 1.0)]))
                .await
        );

        assert!(matches!(
            err,
            SimulationError::BackendCall(BackendError::Delivery(_))
        ));
        assert_eq!(backend.evaluation_count(), 3);
        assert_eq!(backend.track_count(), 3);
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_still_closes_connection() {
        let backend = RecordingBackend::new();
        let mut sim = simulator(&backend);
        let spec = assert_ok!(request(10, vec![EventSpec::new("purchase", 1.0)]).validate());

        // Second event fires at 500ms; give up while it is being paced.
        let cancelled = tokio::time::timeout(Duration::from_millis(750), sim.run(&spec)).await;
        assert!(cancelled.is_err());
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(backend.track_count(), 2);
        assert_eq!(backend.flush_count(), 0);
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_failure_aborts_remaining_entities() {
        let backend = RecordingBackend::new()
            .failing_track_after(2, BackendError::Delivery("queue full".into()));
        let err = assert_err!(
            simulator(&backend)
                .run_request(request(10, vec![EventSpec::new("purchase", 1.0)]))
                .await
        );

        assert!(matches!(err, SimulationError::BackendCall(_)));
        // Third entity evaluated, then its track failed.
        assert_eq!(backend.evaluation_count(), 3);
        assert_eq!(backend.track_count(), 2);
        assert_eq!(backend.flush_count(), 0);
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_only_after_fired_events() {
        let backend = RecordingBackend::new();
        let report = assert_ok!(
            simulator(&backend)
                .run_request(request(
                    20,
                    vec![
                        EventSpec::new("always", 1.0),
                        EventSpec::new("sometimes", 0.5),
                        EventSpec::new("never", 0.0),
                    ],
                ))
                .await
        );

        assert_eq!(
            report.elapsed,
            EVENT_PACING_INTERVAL * report.events_fired as u32
        );
        assert!(report.events_fired >= 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_runs_are_reproducible() {
        let pattern = |backend: &RecordingBackend| -> Vec<String> {
            backend.tracked().into_iter().map(|(name, _)| name).collect()
        };
        let events = vec![EventSpec::new("a", 0.5), EventSpec::new("b", 0.2)];

        let first = RecordingBackend::new();
        assert_ok!(
            Simulator::new(first.clone(), SimulatorConfig::new().with_seed(99))
                .run_request(request(50, events.clone()))
                .await
        );
        let second = RecordingBackend::new();
        assert_ok!(
            Simulator::new(second.clone(), SimulatorConfig::new().with_seed(99))
                .run_request(request(50, events))
                .await
        );

        assert!(!pattern(&first).is_empty());
        assert_eq!(pattern(&first), pattern(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_runs_use_separate_connections() {
        let backend = RecordingBackend::new();
        let mut sim = simulator(&backend);
        let spec = assert_ok!(request(2, vec![EventSpec::new("purchase", 1.0)]).validate());

        assert_ok!(sim.run(&spec).await);
        assert_ok!(sim.run(&spec).await);

        assert_eq!(backend.connect_count(), 2);
        assert_eq!(backend.close_count(), 2);
        assert_eq!(backend.evaluation_count(), 4);
        assert_eq!(sim.backend().flush_count(), 2);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_logs_run_lifecycle() {
        let backend = RecordingBackend::new();
        assert_ok!(
            simulator(&backend)
                .run_request(request(1, vec![EventSpec::new("purchase", 1.0)]))
                .await
        );

        assert!(logs_contain("Starting simulation"));
        assert!(logs_contain("Sent event"));
        assert!(logs_contain("Simulation complete"));
    }

    #[test]
    fn test_pacing_interval_is_half_a_second() {
        assert_eq!(EVENT_PACING_INTERVAL, Duration::from_millis(500));
    }
}
