//! The Saga Engine (C4): drives one booking's saga forward step by step,
//! falls back to the compensation walk on a non-retryable failure, and
//! persists + emits an event after every outcome.
//!
//! Mirrors the forward-execution and compensation-walk algorithms directly:
//! no handler registry, no dynamic dispatch on `StepKind` — just a match.

use std::sync::Arc;
use std::time::Instant;

use booking_core::booking::{Booking, CompleteStepResult, Components, ModificationRequest, Status};
use booking_core::clock::Clock;
use booking_core::error::BookingError;
use booking_core::event_bus::{BookingEvent, BookingEventBus, BookingEventKind};
use booking_core::ids::{BookingId, Version};
use booking_core::ledger::{CompensationOutcome, Lease, Phase, SagaLedger};
use booking_core::plan::{compensation_for, CompensationKind, Plan, StepKind};
use booking_core::reconciliation::{CompensationFailureReport, ReconciliationSink};
use booking_core::service_client::{ErrorClass, ServiceClient, ServiceError, ServiceRequest, ServiceResponse};
use booking_core::store::{BookingStore, StoreError};
use serde_json::Value;

use crate::config::BookingRuntimeConfig;
use crate::metrics::{EventBusMetrics, SagaMetrics, StoreMetrics, TerminalOutcome};

/// Errors `drive`/`submit` surface to the caller. Retryable step failures
/// never reach here — they're handled inside the forward loop.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The durable store hit a backend failure unrelated to booking state
    /// (connection loss, serialization failure).
    #[error(transparent)]
    Store(StoreError),
    /// A requested aggregate transition was illegal from the current state,
    /// or the store signaled a condition with a direct `BookingError`
    /// counterpart (stale version, lost lease, unknown booking).
    #[error(transparent)]
    Booking(#[from] BookingError),
}

/// `StoreError` carries storage-layer vocabulary (`VersionConflict`,
/// `LeaseHeld`) distinct from the aggregate-level vocabulary callers of
/// `drive`/`submit` otherwise see. Conditions with a direct `BookingError`
/// counterpart are translated so a caller only has to match one error
/// taxonomy; genuine backend failures pass through as `EngineError::Store`.
impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { booking_id, expected, found } => {
                Self::Booking(BookingError::Conflict { booking_id, expected, found })
            }
            StoreError::LeaseHeld(booking_id) => Self::Booking(BookingError::LeaseLost(booking_id)),
            StoreError::NotFound(booking_id) => Self::Booking(BookingError::NotFound(booking_id)),
            other @ (StoreError::Backend(_) | StoreError::Serialization(_)) => Self::Store(other),
        }
    }
}

/// Drives bookings through their saga. Cheap to clone (everything behind
/// `Arc`); typically one instance is shared by an entire worker pool.
#[derive(Clone)]
pub struct SagaEngine {
    store: Arc<dyn BookingStore>,
    service_client: Arc<dyn ServiceClient>,
    event_bus: Arc<dyn BookingEventBus>,
    clock: Arc<dyn Clock>,
    reconciliation: Option<Arc<dyn ReconciliationSink>>,
    config: BookingRuntimeConfig,
    worker_id: String,
}

impl SagaEngine {
    /// Assemble an engine from its trait-boundary collaborators plus runtime
    /// configuration and this worker's identity (used for lease ownership
    /// and audit attribution). `reconciliation` is optional: a deployment
    /// that doesn't need operator follow-up on failed compensations (e.g. a
    /// demo harness) can pass `None` and still get correct saga semantics,
    /// just without the `compensation_failures` write.
    #[must_use]
    pub fn new(
        store: Arc<dyn BookingStore>,
        service_client: Arc<dyn ServiceClient>,
        event_bus: Arc<dyn BookingEventBus>,
        clock: Arc<dyn Clock>,
        reconciliation: Option<Arc<dyn ReconciliationSink>>,
        config: BookingRuntimeConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            service_client,
            event_bus,
            clock,
            reconciliation,
            config,
            worker_id: worker_id.into(),
        }
    }

    /// Derive the canonical plan, start the saga, persist the new booking at
    /// its initial version, and emit `BookingCreated`. Does not drive the
    /// saga forward; the caller is expected to enqueue `booking_id` for a
    /// worker to pick up next.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Booking` if `start_saga` rejects the booking
    /// (already has a plan), or `EngineError::Store` on a persist failure.
    pub async fn submit(&self, mut booking: Booking) -> Result<BookingId, EngineError> {
        let now = self.clock.now();
        let plan = Plan::derive(&booking.components().included());
        booking.start_saga(plan, &self.worker_id, now)?;
        let booking_id = booking.booking_id();
        booking.enqueue_outbox(BookingEventKind::BookingCreated, now);
        let version = self.persist(&booking, Version::INITIAL).await?;
        self.drain_outbox(&mut booking, version).await;
        Ok(booking_id)
    }

    /// Acquire `booking_id`'s lease and drive it to a terminal phase
    /// (`Done` or `Aborted`), running the forward loop and, if it fails
    /// irrecoverably, the compensation walk.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if the lease is held by another worker
    /// or a persist call hits a version conflict — in both cases the caller
    /// should simply drop this attempt; another worker owns progress now.
    pub async fn drive(&self, booking_id: BookingId) -> Result<(), EngineError> {
        self.store
            .acquire_lease(booking_id, &self.worker_id, self.config.lease_ttl)
            .await?;

        let (mut booking, mut version) = self.store.load(booking_id).await?;
        booking.set_lease(Some(Lease {
            owner_id: self.worker_id.clone(),
            expires_at: self.clock.now() + chrono::Duration::seconds(self.config.lease_ttl.as_secs() as i64),
        }));

        if matches!(booking.ledger().phase(), Phase::Forward) {
            version = self.run_forward(&mut booking, version).await?;
        }
        if matches!(booking.ledger().phase(), Phase::Compensating) {
            let _ = self.run_compensation(&mut booking, version).await?;
        }
        Ok(())
    }

    /// Synthesize a `HoldExpired` failure for `booking_id`'s current step and
    /// begin compensation. Called by the hold-expiry scan when a sub-service's
    /// hold has passed its `expires_at` without reaching `Confirm`/`Capture`.
    ///
    /// No-ops if another worker has already advanced the saga off `Forward`
    /// phase or past the expired hold — the scan is advisory and can race the
    /// engine's own forward progress.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if the lease is held by another worker.
    pub async fn expire_stale_hold(&self, booking_id: BookingId) -> Result<(), EngineError> {
        self.store
            .acquire_lease(booking_id, &self.worker_id, self.config.lease_ttl)
            .await?;

        let (mut booking, mut version) = self.store.load(booking_id).await?;
        booking.set_lease(Some(Lease {
            owner_id: self.worker_id.clone(),
            expires_at: self.clock.now() + chrono::Duration::seconds(self.config.lease_ttl.as_secs() as i64),
        }));

        if !matches!(booking.ledger().phase(), Phase::Forward) {
            return Ok(());
        }
        let Some(step) = booking.ledger().current_step() else {
            return Ok(());
        };
        if booking.earliest_hold_expiry().is_none_or(|expiry| expiry > self.clock.now()) {
            return Ok(());
        }

        let error = BookingError::HoldExpired { step: step.step_name() };
        let now = self.clock.now();
        booking.fail_step(step, &error, &self.worker_id, now);
        booking.begin_compensation(&self.worker_id, now)?;
        booking.enqueue_outbox(BookingEventKind::StepFailed { step, error: error.to_string() }, now);
        booking.enqueue_outbox(BookingEventKind::SagaCompensating, now);
        version = self.persist(&booking, version).await?;
        version = self.drain_outbox(&mut booking, version).await;
        let _ = self.run_compensation(&mut booking, version).await?;
        Ok(())
    }

    /// Attempt to drain whatever is currently queued in `booking_id`'s
    /// outbox. Called by the outbox-drain loop for bookings
    /// `BookingStore::scan_pending_outbox` reports; independent of saga
    /// phase, since a booking's final event can still be undelivered after
    /// the saga itself has reached a terminal state. Does not acquire the
    /// booking's lease — drain and the forward/compensation walk both go
    /// through `persist`'s optimistic concurrency check, so a race with the
    /// owning worker just costs this attempt a version conflict, logged and
    /// left for the next scan.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if `booking_id` doesn't exist.
    pub async fn drain_pending_outbox(&self, booking_id: BookingId) -> Result<(), EngineError> {
        let (mut booking, version) = self.store.load(booking_id).await?;
        if booking.outbox().is_empty() {
            return Ok(());
        }
        self.drain_outbox(&mut booking, version).await;
        Ok(())
    }

    /// Record a customer-initiated cancellation request against a booking
    /// still awaiting confirmation. Does not drive the saga itself — it
    /// only sets a durable flag on the ledger that `run_forward` consults at
    /// its next step boundary, so a step already in flight under another
    /// worker's lease always finishes before compensation begins. Succeeds
    /// without acquiring the lease: this is a customer request racing the
    /// owning worker's progress, not a drive attempt of its own.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Booking` if the booking is not `PENDING` in
    /// `FORWARD` phase (already confirmed, already compensating, or already
    /// terminal). Returns `EngineError::Store` if three attempts in a row
    /// lose to a concurrent writer on the version check.
    pub async fn request_cancellation(&self, booking_id: BookingId, reason: &str) -> Result<(), EngineError> {
        let mut attempts = 0;
        loop {
            let (mut booking, version) = self.store.load(booking_id).await?;
            booking.request_cancellation(reason, self.clock.now())?;
            match self.store.persist(&booking, version).await {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) if attempts < 2 => {
                    attempts += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Plan a modification against a `CONFIRMED` booking as a delta-saga:
    /// derive the narrower plan covering only components that are newly
    /// added or whose selection changed, extend the existing ledger with it,
    /// and persist. Does not drive the saga itself; the caller enqueues
    /// `booking_id` for a worker same as `submit` does.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Booking` if the booking isn't `CONFIRMED`, the
    /// modification would remove a component, or it changes nothing.
    /// Returns `EngineError::Store` on a persist failure.
    pub async fn plan_modification(&self, booking_id: BookingId, request: ModificationRequest) -> Result<(), EngineError> {
        let (mut booking, version) = self.store.load(booking_id).await?;
        let delta_steps = Self::derive_delta_steps(&booking, &request.components);
        if delta_steps.is_empty() {
            return Err(BookingError::Validation("modification changes no component".to_string()).into());
        }

        let now = self.clock.now();
        booking.start_modification(request.components, delta_steps, &self.worker_id, now)?;
        booking.enqueue_outbox(BookingEventKind::ModificationStarted, now);
        let version = self.persist(&booking, version).await?;
        self.drain_outbox(&mut booking, version).await;
        Ok(())
    }

    /// For each component in `new_components` that is newly present or whose
    /// selection payload differs from the booking's current one, emit a
    /// `[Hold, Confirm]` pair. Components unchanged emit nothing.
    fn derive_delta_steps(booking: &Booking, new_components: &Components) -> Vec<StepKind> {
        let mut steps = Vec::new();
        for component in new_components.included() {
            let changed = booking.components().included_selection(component) != new_components.included_selection(component);
            if changed {
                steps.push(StepKind::Hold(component));
            }
        }
        for component in new_components.included() {
            if steps.contains(&StepKind::Hold(component)) {
                steps.push(StepKind::Confirm(component));
            }
        }
        steps
    }

    /// The forward-execution loop: attempt the step at the cursor, retry
    /// transient failures up to `SagaLedger::DEFAULT_MAX_RETRIES`, and on a
    /// non-retryable failure hand off to compensation. Returns once the plan
    /// completes (`CONFIRMED`) or the saga enters `COMPENSATING`.
    ///
    /// A pending cancellation request is read only *after* a step finishes —
    /// never before one starts — so a cancellation that lands while a step is
    /// in flight still lets that step's downstream effect complete and be
    /// accounted for; only the *next* step is replaced by compensation.
    async fn run_forward(&self, booking: &mut Booking, mut version: Version) -> Result<Version, EngineError> {
        loop {
            if booking.ledger().is_forward_complete() {
                let now = self.clock.now();
                booking.finalize(Status::Confirmed, &self.worker_id, now)?;
                booking.enqueue_outbox(BookingEventKind::BookingConfirmed, now);
                version = self.persist(booking, version).await?;
                version = self.drain_outbox(booking, version).await;
                SagaMetrics::record_terminal(TerminalOutcome::Confirmed);
                return Ok(version);
            }

            let Some(step) = booking.ledger().current_step() else {
                return Ok(version);
            };

            if self.clock.now() - booking.created_at() > self.booking_deadline() {
                let error = BookingError::DeadlineExceeded { step: step.step_name() };
                let now = self.clock.now();
                booking.fail_step(step, &error, &self.worker_id, now);
                booking.begin_compensation(&self.worker_id, now)?;
                booking.enqueue_outbox(BookingEventKind::StepFailed { step, error: error.to_string() }, now);
                booking.enqueue_outbox(BookingEventKind::SagaCompensating, now);
                version = self.persist(booking, version).await?;
                version = self.drain_outbox(booking, version).await;
                return Ok(version);
            }

            let idempotency_key = Self::idempotency_key(booking.booking_id(), &step.step_name(), booking.ledger().transaction_id());
            let request = self.build_step_request(booking, step, idempotency_key);

            let started = Instant::now();
            match self.service_client.invoke(request).await {
                Ok(response) => {
                    SagaMetrics::record_step_completed(started.elapsed());
                    let result = Self::complete_result(response);
                    let now = self.clock.now();
                    booking.complete_step(step, result, &self.worker_id, now)?;
                    booking.enqueue_outbox(BookingEventKind::StepCompleted { step }, now);
                    version = self.persist(booking, version).await?;
                    version = self.drain_outbox(booking, version).await;

                    if booking.ledger().cancellation_requested() && !booking.ledger().is_forward_complete() {
                        let now = self.clock.now();
                        booking.begin_compensation(&self.worker_id, now)?;
                        booking.enqueue_outbox(BookingEventKind::SagaCompensating, now);
                        version = self.persist(booking, version).await?;
                        version = self.drain_outbox(booking, version).await;
                        return Ok(version);
                    }
                }
                Err(service_error) => {
                    SagaMetrics::record_step_failed();
                    let error = Self::classify(step, &service_error);
                    let retry_count = booking.ledger().retry_count();

                    if error.is_retryable() && retry_count < SagaLedger::DEFAULT_MAX_RETRIES {
                        booking.fail_step(step, &error, &self.worker_id, self.clock.now());
                        version = self.persist(booking, version).await?;
                        tokio::time::sleep(self.config.retry_policy().delay_for_attempt(retry_count as usize)).await;
                        continue;
                    }

                    let now = self.clock.now();
                    booking.fail_step(step, &error, &self.worker_id, now);
                    booking.begin_compensation(&self.worker_id, now)?;
                    booking.enqueue_outbox(BookingEventKind::StepFailed { step, error: error.to_string() }, now);
                    booking.enqueue_outbox(BookingEventKind::SagaCompensating, now);
                    version = self.persist(booking, version).await?;
                    version = self.drain_outbox(booking, version).await;
                    return Ok(version);
                }
            }
        }
    }

    /// `booking_deadline` as a `chrono::Duration`, for comparison against
    /// `Clock::now() - Booking::created_at()`.
    fn booking_deadline(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.booking_deadline).unwrap_or(chrono::Duration::MAX)
    }

    /// The compensation walk: undo every completed step in reverse order.
    /// Non-compensable steps (`Notify`) are skipped without a ledger entry.
    /// A compensation that exhausts its retries is recorded `Failed` but
    /// does **not** stop the walk — every other completed step still gets a
    /// rollback attempt.
    async fn run_compensation(&self, booking: &mut Booking, mut version: Version) -> Result<Version, EngineError> {
        let steps: Vec<StepKind> = booking.ledger().completed().iter().rev().map(|c| c.step).collect();
        let mut any_unresolved = false;

        for step in steps {
            let Some(compensation) = compensation_for(step) else {
                tracing::debug!(%step, "step has no compensation, skipping");
                continue;
            };

            let outcome = self.attempt_compensation(booking, compensation).await;
            if let CompensationOutcome::Failed { message } = &outcome {
                any_unresolved = true;
                self.flag_for_reconciliation(booking, compensation, message).await;
            }
            SagaMetrics::record_compensation();
            booking.record_compensation(compensation, outcome, &self.worker_id, self.clock.now());
            version = self.persist(booking, version).await?;
        }

        let unresolved = any_unresolved || booking.ledger().has_unresolved_compensation();
        let (outcome_status, event, metric) = if unresolved {
            (Status::Failed, BookingEventKind::BookingFailed, TerminalOutcome::Failed)
        } else {
            (Status::Cancelled, BookingEventKind::BookingCancelled, TerminalOutcome::Cancelled)
        };

        let now = self.clock.now();
        booking.finalize(outcome_status, &self.worker_id, now)?;
        booking.enqueue_outbox(event, now);
        version = self.persist(booking, version).await?;
        version = self.drain_outbox(booking, version).await;
        SagaMetrics::record_terminal(metric);
        Ok(version)
    }

    /// Log the compensation failure (constructing the matching `BookingError`
    /// variant purely for its `Display` form) and, if a reconciliation sink
    /// is configured, durably flag it for operator follow-up. The booking's
    /// own ledger entry (written by the caller right after this returns)
    /// remains the authoritative record either way.
    async fn flag_for_reconciliation(&self, booking: &Booking, compensation: CompensationKind, message: &str) {
        let error = BookingError::CompensationFailed { step: compensation.to_string(), message: message.to_string() };
        tracing::warn!(booking_id = %booking.booking_id(), %compensation, error = %error, "compensation failed, flagging for reconciliation");
        SagaMetrics::record_reconciliation_flag();

        let Some(sink) = &self.reconciliation else {
            return;
        };
        let report = CompensationFailureReport {
            booking_id: booking.booking_id(),
            compensation,
            message: message.to_string(),
            failed_at: self.clock.now(),
        };
        if let Err(err) = sink.record_failure(report).await {
            tracing::warn!(booking_id = %booking.booking_id(), error = %err, "failed to record compensation failure for reconciliation");
        }
    }

    async fn attempt_compensation(&self, booking: &Booking, compensation: CompensationKind) -> CompensationOutcome {
        for attempt in 0..SagaLedger::DEFAULT_MAX_RETRIES {
            let idempotency_key = Self::idempotency_key(booking.booking_id(), &compensation.to_string(), "COMP");
            let request = self.build_compensation_request(booking, compensation, idempotency_key);
            match self.service_client.invoke(request).await {
                Ok(_) => return CompensationOutcome::Succeeded,
                Err(service_error) => {
                    if matches!(service_error.class, ErrorClass::Transient) && attempt + 1 < SagaLedger::DEFAULT_MAX_RETRIES {
                        tokio::time::sleep(self.config.retry_policy().delay_for_attempt(attempt as usize)).await;
                        continue;
                    }
                    return CompensationOutcome::Failed { message: service_error.to_string() };
                }
            }
        }
        CompensationOutcome::Failed { message: "exhausted compensation retries".to_string() }
    }

    async fn persist(&self, booking: &Booking, expected_version: Version) -> Result<Version, EngineError> {
        let started = Instant::now();
        let result = self.store.persist(booking, expected_version).await;
        StoreMetrics::record_persist(started.elapsed());
        if matches!(result, Err(StoreError::VersionConflict { .. })) {
            StoreMetrics::record_version_conflict();
        }
        Ok(result?)
    }

    /// Drain every entry currently in `booking`'s outbox, in order, stopping
    /// at the first publish failure so per-booking ordering is preserved —
    /// the remaining tail stays queued for the next drive or the background
    /// outbox-drain loop to retry. Acks are persisted in a second write once
    /// the drain pass finishes; a failure persisting those acks is logged
    /// and simply redrains (at-least-once, never silently dropped) next time.
    async fn drain_outbox(&self, booking: &mut Booking, version: Version) -> Version {
        let mut version = version;
        let mut acked_any = false;

        for entry in booking.outbox().to_vec() {
            let event = BookingEvent {
                booking_id: booking.booking_id(),
                sequence: entry.sequence,
                occurred_at: entry.occurred_at,
                kind: entry.kind,
            };
            match self.event_bus.publish(event).await {
                Ok(()) => {
                    EventBusMetrics::record_publish();
                    EventBusMetrics::record_outbox_drained();
                    booking.ack_outbox(entry.sequence);
                    acked_any = true;
                }
                Err(err) => {
                    EventBusMetrics::record_publish_error();
                    tracing::warn!(booking_id = %booking.booking_id(), error = %err, "failed to drain outbox entry, left for redelivery");
                    break;
                }
            }
        }

        if acked_any {
            match self.persist(booking, version).await {
                Ok(new_version) => version = new_version,
                Err(err) => tracing::warn!(booking_id = %booking.booking_id(), error = %err, "failed to persist outbox acks, will redrain"),
            }
        }
        version
    }

    /// `attempt_group` identifies the saga generation a step belongs to
    /// (the ledger's `transaction_id` for a forward step, the constant
    /// `"COMP"` tag for any compensation): stable across every in-call retry
    /// of that step so a downstream sees the same key on every retry, yet
    /// distinct across a delta-saga's own transaction.
    fn idempotency_key(booking_id: BookingId, step_name: &str, attempt_group: impl std::fmt::Display) -> String {
        format!("{booking_id}:{step_name}:{attempt_group}")
    }

    /// `ErrorClass::Unknown` has already been retried once inside the
    /// service client itself (see `HttpServiceClient::invoke`); by the time
    /// it reaches the engine it is treated the same as `Permanent` so the
    /// saga makes forward progress towards a terminal state instead of
    /// retrying indefinitely.
    fn classify(step: StepKind, error: &ServiceError) -> BookingError {
        match error.class {
            ErrorClass::Transient => BookingError::Transient {
                step: step.step_name(),
                message: error.message.clone(),
            },
            ErrorClass::Permanent | ErrorClass::Unknown => BookingError::Permanent {
                step: step.step_name(),
                message: error.message.clone(),
            },
        }
    }

    fn complete_result(response: ServiceResponse) -> CompleteStepResult {
        let downstream_id = response.body.get("id").and_then(Value::as_str).map(str::to_string);
        let confirmation_number = response
            .body
            .get("confirmation_number")
            .and_then(Value::as_str)
            .map(str::to_string);
        CompleteStepResult {
            downstream_id,
            confirmation_number,
            payload: response.body,
        }
    }

    fn build_step_request(&self, booking: &Booking, step: StepKind, idempotency_key: String) -> ServiceRequest {
        let payload = match step {
            StepKind::Hold(component) => {
                let selection = booking.components().included_selection(component);
                serde_json::json!({
                    "booking_id": booking.booking_id().to_string(),
                    "selection": selection,
                })
            }
            StepKind::Authorize => {
                let pricing = booking.pricing();
                serde_json::json!({
                    "booking_id": booking.booking_id().to_string(),
                    "amount": pricing.total,
                    "currency": pricing.currency,
                })
            }
            StepKind::Confirm(component) => serde_json::json!({
                "booking_id": booking.booking_id().to_string(),
                "hold_id": booking.component_state(component).downstream_id,
            }),
            StepKind::Capture => serde_json::json!({
                "booking_id": booking.booking_id().to_string(),
                "authorization_id": booking.payment_state().downstream_id,
            }),
            StepKind::Notify => serde_json::json!({
                "booking_id": booking.booking_id().to_string(),
                "booking_number": booking.booking_number(),
            }),
        };

        ServiceRequest {
            service: step.service_name().to_string(),
            action: step.action_name().to_string(),
            payload,
            idempotency_key,
        }
    }

    fn build_compensation_request(&self, booking: &Booking, compensation: CompensationKind, idempotency_key: String) -> ServiceRequest {
        let payload = match compensation {
            CompensationKind::ReleaseHold(component) => serde_json::json!({
                "booking_id": booking.booking_id().to_string(),
                "hold_id": booking.component_state(component).downstream_id,
            }),
            CompensationKind::VoidAuthorization => serde_json::json!({
                "booking_id": booking.booking_id().to_string(),
                "authorization_id": booking.payment_state().downstream_id,
            }),
            CompensationKind::CancelBooking(component) => serde_json::json!({
                "booking_id": booking.booking_id().to_string(),
                "confirmation_number": booking.component_state(component).confirmation_number,
            }),
            CompensationKind::Refund => serde_json::json!({
                "booking_id": booking.booking_id().to_string(),
                "authorization_id": booking.payment_state().downstream_id,
                "amount": booking.pricing().total,
            }),
        };

        ServiceRequest {
            service: compensation.service_name().to_string(),
            action: compensation.action_name().to_string(),
            payload,
            idempotency_key,
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use booking_core::ids::BookingId;
    use proptest::prelude::*;

    proptest! {
        /// The same `(booking_id, step_name, attempt_group)` triple always
        /// produces the same key: a downstream relying on it to dedupe a
        /// retried call must see an identical key on every retry.
        #[test]
        fn idempotency_key_is_stable_for_the_same_inputs(
            step_name in "[a-z_]{1,12}",
            attempt_group in 0u32..1000,
        ) {
            let booking_id = BookingId::new();
            let first = SagaEngine::idempotency_key(booking_id, &step_name, attempt_group);
            let second = SagaEngine::idempotency_key(booking_id, &step_name, attempt_group);
            prop_assert_eq!(first, second);
        }

        /// Distinct attempt groups (e.g. a delta-saga's own transaction vs. the
        /// original one) never collide on the same booking and step name.
        #[test]
        fn idempotency_key_differs_across_attempt_groups(
            step_name in "[a-z_]{1,12}",
            a in 0u32..1000,
            b in 1000u32..2000,
        ) {
            let booking_id = BookingId::new();
            let key_a = SagaEngine::idempotency_key(booking_id, &step_name, a);
            let key_b = SagaEngine::idempotency_key(booking_id, &step_name, b);
            prop_assert_ne!(key_a, key_b);
        }
    }
}
