//! The booking aggregate (C5): typed state, invariants, and the minimal
//! mutation API the saga engine drives. Only the methods in this module
//! mutate a `Booking`; every one of them appends exactly one audit entry.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{Actor, AuditTrail};
use crate::error::BookingError;
use crate::event_bus::{BookingEventKind, OutboxEntry};
use crate::ids::{BookingId, TransactionId};
use crate::ledger::{CompensationOutcome, Lease, Phase, SagaLedger};
use crate::plan::{Component, CompensationKind, Plan, StepKind};

/// Overall booking status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Submitted, saga not yet confirmed.
    Pending,
    /// All forward steps succeeded.
    Confirmed,
    /// Compensation completed cleanly.
    Cancelled,
    /// Travel date has passed on a confirmed booking (out of saga's own
    /// scope to reach; recorded for completeness).
    Completed,
    /// Compensation finished with an unresolved failure.
    Failed,
}

/// Per-downstream sub-status, one instance per `{flight, hotel, car, payment,
/// notification}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubStatus {
    /// No call has been attempted yet.
    NotStarted,
    /// A hold/authorization is in place but not yet confirmed/captured.
    Held,
    /// The step's forward effect is committed.
    Confirmed,
    /// The step failed and will not be retried further.
    Failed,
    /// The step's effect was rolled back by compensation.
    Compensated,
}

/// State tracked for one of the five sub-services a saga may touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubServiceState {
    /// Whether this saga's plan includes this sub-service at all.
    pub required: bool,
    /// Current sub-status.
    pub sub_status: SubStatus,
    /// Downstream-assigned identifier (hold token, authorization id, ...).
    pub downstream_id: Option<String>,
    /// Downstream-assigned confirmation number, once confirmed.
    pub confirmation_number: Option<String>,
    /// Retries attempted for the current step against this sub-service.
    pub retry_count: u32,
    /// Most recent error, if any.
    pub last_error: Option<String>,
    /// Expiry of an outstanding hold or authorization, if this sub-service is
    /// currently `Held`. Polled by the crash-recovery loop to synthesize a
    /// `HoldExpired` failure if the saga doesn't reach `Confirm`/`Capture` in
    /// time.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SubServiceState {
    const fn not_required() -> Self {
        Self {
            required: false,
            sub_status: SubStatus::NotStarted,
            downstream_id: None,
            confirmation_number: None,
            retry_count: 0,
            last_error: None,
            expires_at: None,
        }
    }

    const fn required() -> Self {
        Self {
            required: true,
            sub_status: SubStatus::NotStarted,
            downstream_id: None,
            confirmation_number: None,
            retry_count: 0,
            last_error: None,
            expires_at: None,
        }
    }
}

/// One inventory component's search/selection payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRequest {
    /// Opaque downstream selection payload (fare id, room id, ...).
    pub selection: serde_json::Value,
}

/// The `{flight?, hotel?, car?}` mapping. At least one must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Components {
    /// Flight selection, if included.
    pub flight: Option<ComponentRequest>,
    /// Hotel selection, if included.
    pub hotel: Option<ComponentRequest>,
    /// Car selection, if included.
    pub car: Option<ComponentRequest>,
}

impl Components {
    /// The set of components actually included, in canonical plan order.
    #[must_use]
    pub fn included(&self) -> Vec<Component> {
        let mut out = Vec::with_capacity(3);
        if self.flight.is_some() {
            out.push(Component::Flight);
        }
        if self.hotel.is_some() {
            out.push(Component::Hotel);
        }
        if self.car.is_some() {
            out.push(Component::Car);
        }
        out
    }

    /// The raw selection payload for one component, or `Value::Null` if it
    /// isn't included (callers should only reach this for a component the
    /// saga plan actually touches).
    #[must_use]
    pub fn included_selection(&self, component: Component) -> serde_json::Value {
        let request = match component {
            Component::Flight => &self.flight,
            Component::Hotel => &self.hotel,
            Component::Car => &self.car,
        };
        request.as_ref().map_or(serde_json::Value::Null, |r| r.selection.clone())
    }
}

/// Contact details for the booking party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Contact email.
    pub email: String,
    /// Contact phone number.
    pub phone: String,
    /// Locale for notification rendering.
    pub locale: String,
}

/// Passenger/occupant counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Passengers {
    /// Adults, must be at least 1.
    pub adults: u32,
    /// Children.
    pub children: u32,
    /// Infants.
    pub infants: u32,
}

/// Travel dates, locations, and party size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Travel {
    /// Departure date.
    pub departure_date: NaiveDate,
    /// Return date; must be strictly after `departure_date` when present.
    pub return_date: Option<NaiveDate>,
    /// Departure location code.
    pub departure_location: String,
    /// Return/destination location code.
    pub return_location: String,
    /// Party size.
    pub passengers: Passengers,
    /// Number of rooms, at least 1.
    pub rooms: u32,
}

/// Monetary breakdown. Invariant: `total = subtotal + taxes + fees - discounts`
/// and `total >= 0`, enforced by `recompute`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pricing {
    /// Pre-tax, pre-fee cost.
    pub subtotal: i64,
    /// Taxes, in minor currency units.
    pub taxes: i64,
    /// Fees, in minor currency units.
    pub fees: i64,
    /// Discounts, in minor currency units.
    pub discounts: i64,
    /// `subtotal + taxes + fees - discounts`, kept in sync by `recompute`.
    pub total: i64,
    /// ISO-4217 currency code.
    pub currency: String,
}

impl Pricing {
    /// Build a pricing breakdown, computing and validating `total`.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::Validation` if the computed total would be
    /// negative.
    pub fn new(subtotal: i64, taxes: i64, fees: i64, discounts: i64, currency: impl Into<String>) -> Result<Self, BookingError> {
        let mut pricing = Self {
            subtotal,
            taxes,
            fees,
            discounts,
            total: 0,
            currency: currency.into(),
        };
        pricing.recompute()?;
        Ok(pricing)
    }

    /// Recompute `total` from the components and enforce it is non-negative.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::Validation` if the computed total would be
    /// negative.
    pub fn recompute(&mut self) -> Result<(), BookingError> {
        let total = self.subtotal + self.taxes + self.fees - self.discounts;
        if total < 0 {
            return Err(BookingError::Validation(format!(
                "pricing total would be negative: {total}"
            )));
        }
        self.total = total;
        Ok(())
    }
}

/// A request to change a confirmed booking's components, handled as a
/// delta-saga by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationRequest {
    /// New component selection to move towards.
    pub components: Components,
}

/// A request to refund part or all of a captured payment outside of saga
/// compensation (e.g. a goodwill credit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Amount to refund, in minor currency units.
    pub amount: i64,
    /// Reason recorded in the audit trail.
    pub reason: String,
}

/// The booking aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    booking_id: BookingId,
    booking_number: String,
    customer_id: String,
    contact: Contact,
    components: Components,
    travel: Travel,
    pricing: Pricing,
    status: Status,
    flight_state: SubServiceState,
    hotel_state: SubServiceState,
    car_state: SubServiceState,
    payment_state: SubServiceState,
    notification_state: SubServiceState,
    ledger: SagaLedger,
    audit: AuditTrail,
    created_at: DateTime<Utc>,
    outbox: Vec<OutboxEntry>,
}

impl Booking {
    /// Construct a new booking in `PENDING` status with an empty, unplanned
    /// ledger in `FORWARD` phase at cursor 0 (`start_saga` fills in the plan).
    ///
    /// # Errors
    ///
    /// Returns `BookingError::Validation` if any data-model invariant from
    /// the booking's construction fails: no components included, party size
    /// out of range, return date not after departure date, or a negative
    /// pricing total.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        booking_number: impl Into<String>,
        customer_id: impl Into<String>,
        contact: Contact,
        components: Components,
        travel: Travel,
        pricing: Pricing,
        now: DateTime<Utc>,
    ) -> Result<Self, BookingError> {
        if components.included().is_empty() {
            return Err(BookingError::Validation(
                "at least one of flight, hotel, car must be present".to_string(),
            ));
        }
        if travel.passengers.adults < 1 {
            return Err(BookingError::Validation("adults must be at least 1".to_string()));
        }
        if travel.rooms < 1 {
            return Err(BookingError::Validation("rooms must be at least 1".to_string()));
        }
        if let Some(return_date) = travel.return_date {
            if return_date <= travel.departure_date {
                return Err(BookingError::Validation(
                    "return date must be strictly after departure date".to_string(),
                ));
            }
        }

        let flight_state = if components.flight.is_some() {
            SubServiceState::required()
        } else {
            SubServiceState::not_required()
        };
        let hotel_state = if components.hotel.is_some() {
            SubServiceState::required()
        } else {
            SubServiceState::not_required()
        };
        let car_state = if components.car.is_some() {
            SubServiceState::required()
        } else {
            SubServiceState::not_required()
        };

        let booking_number = booking_number.into();
        let mut audit = AuditTrail::new();
        audit.append(
            "create",
            serde_json::json!({"booking_number": &booking_number}),
            Actor::Customer,
            now,
        );

        Ok(Self {
            booking_id: BookingId::new(),
            booking_number,
            customer_id: customer_id.into(),
            contact,
            components,
            travel,
            pricing,
            status: Status::Pending,
            flight_state,
            hotel_state,
            car_state,
            payment_state: SubServiceState::required(),
            notification_state: SubServiceState::required(),
            ledger: SagaLedger::new(TransactionId::new(), Plan::default()),
            audit,
            created_at: now,
            outbox: Vec::new(),
        })
    }

    /// When this booking was first created. The reference point for the
    /// booking-level deadline (§4.1): a saga still stranded this long after
    /// creation is force-compensated regardless of lease state.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Events queued for publication but not yet confirmed delivered,
    /// appended to the aggregate in the same write that produced them so
    /// they survive a crash between persisting the state change and
    /// publishing it. Drained by the engine after each persist, or by the
    /// background outbox-drain loop if that drain attempt fails.
    #[must_use]
    pub fn outbox(&self) -> &[OutboxEntry] {
        &self.outbox
    }

    /// Append an event to the outbox, sequenced by the audit trail's current
    /// length (the same numbering the event bus contract uses for dedup).
    pub(crate) fn enqueue_outbox(&mut self, kind: BookingEventKind, now: DateTime<Utc>) {
        self.outbox.push(OutboxEntry {
            sequence: self.audit.len() as u64,
            occurred_at: now,
            kind,
        });
    }

    /// Remove an outbox entry once it has been durably published.
    pub(crate) fn ack_outbox(&mut self, sequence: u64) {
        self.outbox.retain(|entry| entry.sequence != sequence);
    }

    /// Stable booking identity.
    #[must_use]
    pub const fn booking_id(&self) -> BookingId {
        self.booking_id
    }

    /// Customer-facing booking reference.
    #[must_use]
    pub fn booking_number(&self) -> &str {
        &self.booking_number
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// The saga ledger.
    #[must_use]
    pub const fn ledger(&self) -> &SagaLedger {
        &self.ledger
    }

    /// The pricing breakdown.
    #[must_use]
    pub const fn pricing(&self) -> Pricing {
        self.pricing
    }

    /// The audit trail.
    #[must_use]
    pub const fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// The included components.
    #[must_use]
    pub const fn components(&self) -> &Components {
        &self.components
    }

    /// Sub-service state for a given inventory component.
    #[must_use]
    pub const fn component_state(&self, component: Component) -> &SubServiceState {
        match component {
            Component::Flight => &self.flight_state,
            Component::Hotel => &self.hotel_state,
            Component::Car => &self.car_state,
        }
    }

    /// Sub-service state for payment.
    #[must_use]
    pub const fn payment_state(&self) -> &SubServiceState {
        &self.payment_state
    }

    /// Sub-service state for notification.
    #[must_use]
    pub const fn notification_state(&self) -> &SubServiceState {
        &self.notification_state
    }

    /// Earliest `expires_at` among sub-services currently `Held`, if any.
    /// A store uses this to schedule a `HoldExpired` scan without needing to
    /// know which component the hold belongs to.
    #[must_use]
    pub fn earliest_hold_expiry(&self) -> Option<DateTime<Utc>> {
        [&self.flight_state, &self.hotel_state, &self.car_state]
            .into_iter()
            .filter(|s| matches!(s.sub_status, SubStatus::Held))
            .filter_map(|s| s.expires_at)
            .min()
    }

    fn sub_state_mut(&mut self, step: StepKind) -> &mut SubServiceState {
        match step {
            StepKind::Hold(c) | StepKind::Confirm(c) => match c {
                Component::Flight => &mut self.flight_state,
                Component::Hotel => &mut self.hotel_state,
                Component::Car => &mut self.car_state,
            },
            StepKind::Authorize | StepKind::Capture => &mut self.payment_state,
            StepKind::Notify => &mut self.notification_state,
        }
    }

    fn sub_state_for_component_mut(&mut self, component: Component) -> &mut SubServiceState {
        match component {
            Component::Flight => &mut self.flight_state,
            Component::Hotel => &mut self.hotel_state,
            Component::Car => &mut self.car_state,
        }
    }

    fn compensation_sub_state_mut(&mut self, compensation: CompensationKind) -> &mut SubServiceState {
        match compensation {
            CompensationKind::ReleaseHold(c) | CompensationKind::CancelBooking(c) => match c {
                Component::Flight => &mut self.flight_state,
                Component::Hotel => &mut self.hotel_state,
                Component::Car => &mut self.car_state,
            },
            CompensationKind::VoidAuthorization | CompensationKind::Refund => &mut self.payment_state,
        }
    }

    /// Assign the step plan. Requires `status = PENDING` and `phase =
    /// FORWARD`.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` if the booking is not
    /// `PENDING` or the ledger is not in `FORWARD` phase.
    pub fn start_saga(&mut self, plan: Plan, worker_id: &str, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status != Status::Pending {
            return Err(BookingError::IllegalTransition(
                "start_saga requires status = PENDING".to_string(),
            ));
        }
        if !matches!(self.ledger.phase(), Phase::Forward) {
            return Err(BookingError::IllegalTransition(
                "start_saga requires phase = FORWARD".to_string(),
            ));
        }
        self.ledger = SagaLedger::new(self.ledger.transaction_id(), plan);
        self.audit.append(
            "start_saga",
            serde_json::json!({"transaction_id": self.ledger.transaction_id().to_string()}),
            Actor::Engine { worker_id: worker_id.to_string() },
            now,
        );
        Ok(())
    }

    /// Record a successful step: append to `completed`, advance `cursor`,
    /// reset `retry_count`, and mark the targeted sub-service confirmed (or
    /// held, for a `Hold`/`Authorize` step — full confirmation comes from the
    /// matching `Confirm`/`Capture` step).
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` if the step is not the one
    /// currently at the ledger's cursor.
    pub fn complete_step(
        &mut self,
        step: StepKind,
        result: CompleteStepResult,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.ledger.current_step() != Some(step) {
            return Err(BookingError::IllegalTransition(format!(
                "{step} is not the current step"
            )));
        }
        let sub_status = match step {
            StepKind::Hold(_) | StepKind::Authorize => SubStatus::Held,
            StepKind::Confirm(_) | StepKind::Capture | StepKind::Notify => SubStatus::Confirmed,
        };
        let downstream_id = result.downstream_id.clone();
        let confirmation_number = result.confirmation_number.clone();
        let payload = result.payload.clone();
        let state = self.sub_state_mut(step);
        state.sub_status = sub_status;
        if downstream_id.is_some() {
            state.downstream_id = downstream_id;
        }
        if confirmation_number.is_some() {
            state.confirmation_number = confirmation_number;
        }
        state.last_error = None;

        self.ledger.push_completed(step, payload, now);
        self.audit.append(
            "complete_step",
            serde_json::json!({"step": step.step_name()}),
            Actor::Engine { worker_id: worker_id.to_string() },
            now,
        );
        Ok(())
    }

    /// Record a failed attempt at the step currently at the cursor: append to
    /// `failed`, bump the step's retry count.
    pub fn fail_step(&mut self, step: StepKind, error: &BookingError, worker_id: &str, now: DateTime<Utc>) {
        let message = error.to_string();
        {
            let state = self.sub_state_mut(step);
            state.retry_count += 1;
            state.last_error = Some(message.clone());
            if !error.is_retryable() {
                state.sub_status = SubStatus::Failed;
            }
        }
        self.ledger.push_failed(step, message, now);
        self.ledger.increment_retry();
        self.audit.append(
            "fail_step",
            serde_json::json!({"step": step.step_name(), "error": error.to_string()}),
            Actor::Engine { worker_id: worker_id.to_string() },
            now,
        );
    }

    /// Move from `FORWARD` into `COMPENSATING`.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` if not currently in
    /// `FORWARD` phase.
    pub fn begin_compensation(&mut self, worker_id: &str, now: DateTime<Utc>) -> Result<(), BookingError> {
        if !matches!(self.ledger.phase(), Phase::Forward) {
            return Err(BookingError::IllegalTransition(
                "begin_compensation requires phase = FORWARD".to_string(),
            ));
        }
        self.ledger.set_phase(Phase::Compensating);
        self.audit.append(
            "begin_compensation",
            serde_json::json!({}),
            Actor::Engine { worker_id: worker_id.to_string() },
            now,
        );
        Ok(())
    }

    /// Append-only record of one compensation attempt's outcome, and update
    /// the targeted sub-service's status accordingly.
    pub fn record_compensation(
        &mut self,
        compensation: CompensationKind,
        outcome: CompensationOutcome,
        worker_id: &str,
        now: DateTime<Utc>,
    ) {
        let sub_status = match &outcome {
            CompensationOutcome::Succeeded => Some(SubStatus::Compensated),
            CompensationOutcome::Failed { .. } | CompensationOutcome::Skipped => None,
        };
        if let Some(sub_status) = sub_status {
            self.compensation_sub_state_mut(compensation).sub_status = sub_status;
        }
        let details = serde_json::json!({"compensation": compensation.to_string()});
        self.ledger.push_compensation(compensation, outcome, now);
        self.audit.append(
            "record_compensation",
            details,
            Actor::Engine { worker_id: worker_id.to_string() },
            now,
        );
    }

    /// Set a terminal status and the matching terminal phase.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` if the ledger is already in
    /// a terminal phase, or if `outcome` does not agree with the current
    /// saga phase (e.g. finalizing `CONFIRMED` while still `COMPENSATING`).
    pub fn finalize(&mut self, outcome: Status, worker_id: &str, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.ledger.phase().is_terminal() {
            return Err(BookingError::IllegalTransition(
                "cannot finalize a booking already in a terminal phase".to_string(),
            ));
        }
        let phase = match outcome {
            Status::Confirmed => {
                if !matches!(self.ledger.phase(), Phase::Forward) {
                    return Err(BookingError::IllegalTransition(
                        "CONFIRMED requires phase = FORWARD with the plan fully completed".to_string(),
                    ));
                }
                Phase::Done
            }
            Status::Cancelled => Phase::Done,
            Status::Failed => Phase::Aborted,
            Status::Pending | Status::Completed => {
                return Err(BookingError::IllegalTransition(format!(
                    "{outcome:?} is not a valid finalize outcome"
                )));
            }
        };
        self.ledger.set_phase(phase);
        self.status = outcome;
        self.audit.append(
            "finalize",
            serde_json::json!({"outcome": format!("{outcome:?}")}),
            Actor::Engine { worker_id: worker_id.to_string() },
            now,
        );
        Ok(())
    }

    /// Recompute pricing with a delta applied to one or more components.
    /// Refused once the booking is `CONFIRMED`.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` if the booking is already
    /// `CONFIRMED`, or `BookingError::Validation` if the new total would be
    /// negative.
    pub fn update_pricing(&mut self, delta: PricingDelta, worker_id: &str, now: DateTime<Utc>) -> Result<(), BookingError> {
        if matches!(self.status, Status::Confirmed) {
            return Err(BookingError::IllegalTransition(
                "pricing cannot change after CONFIRMED".to_string(),
            ));
        }
        self.pricing.subtotal += delta.subtotal;
        self.pricing.taxes += delta.taxes;
        self.pricing.fees += delta.fees;
        self.pricing.discounts += delta.discounts;
        self.pricing.recompute()?;
        self.audit.append(
            "update_pricing",
            serde_json::json!({"new_total": self.pricing.total}),
            Actor::Engine { worker_id: worker_id.to_string() },
            now,
        );
        Ok(())
    }

    /// Record a modification request. Permitted only in `PENDING` or
    /// `CONFIRMED`.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` otherwise.
    pub fn add_modification(&mut self, request: &ModificationRequest, now: DateTime<Utc>) -> Result<(), BookingError> {
        if !matches!(self.status, Status::Pending | Status::Confirmed) {
            return Err(BookingError::IllegalTransition(
                "modifications are only permitted in PENDING or CONFIRMED".to_string(),
            ));
        }
        self.audit.append(
            "add_modification",
            serde_json::json!({"components": request.components}),
            Actor::Customer,
            now,
        );
        Ok(())
    }

    /// Record a refund request against a captured payment. Permitted only
    /// once payment has been confirmed (captured).
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` if payment has not been
    /// captured, or `BookingError::Validation` if the refund would exceed the
    /// captured amount.
    pub fn add_refund(&mut self, request: &RefundRequest, now: DateTime<Utc>) -> Result<(), BookingError> {
        if !matches!(self.payment_state.sub_status, SubStatus::Confirmed) {
            return Err(BookingError::IllegalTransition(
                "refunds require a captured payment".to_string(),
            ));
        }
        if request.amount > self.pricing.total {
            return Err(BookingError::Validation(
                "refund amount exceeds captured amount".to_string(),
            ));
        }
        self.audit.append(
            "add_refund",
            serde_json::json!({"amount": request.amount, "reason": request.reason}),
            Actor::Customer,
            now,
        );
        Ok(())
    }

    /// Acquire or renew the saga's lease.
    pub fn set_lease(&mut self, lease: Option<Lease>) {
        self.ledger.set_lease(lease);
    }

    /// Record a customer-initiated cancellation request. Does not itself
    /// begin compensation — the engine's forward loop reads the flag back at
    /// the next step boundary, after whatever step is currently in flight
    /// completes, and jumps to compensation from there. Permitted only
    /// before confirmation; cancelling a `CONFIRMED` booking is a refund
    /// request, not a saga rollback, and is out of scope here.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` unless the booking is
    /// `PENDING` with its ledger still in `FORWARD` phase.
    pub fn request_cancellation(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status != Status::Pending {
            return Err(BookingError::IllegalTransition(
                "cancellation requires status = PENDING".to_string(),
            ));
        }
        if !matches!(self.ledger.phase(), Phase::Forward) {
            return Err(BookingError::IllegalTransition(
                "cancellation requires phase = FORWARD".to_string(),
            ));
        }
        self.ledger.set_cancellation_requested(true);
        self.audit.append(
            "request_cancellation",
            serde_json::json!({"reason": reason}),
            Actor::Customer,
            now,
        );
        Ok(())
    }

    /// Begin a modification delta-saga against a `CONFIRMED` booking: extend
    /// the existing ledger's plan with `delta_steps`, reopen `FORWARD` phase
    /// for the engine to drive, and adopt `new_components`. Reuses the
    /// existing `transaction_id` — a modification is a continuation of the
    /// same saga, not a new one.
    ///
    /// Only covers adding a component or changing an existing component's
    /// selection; `new_components` must be a superset of the components
    /// already on the booking.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::IllegalTransition` unless `status = CONFIRMED`.
    /// Returns `BookingError::Validation` if `new_components` drops a
    /// component the booking already has.
    pub fn start_modification(
        &mut self,
        new_components: Components,
        delta_steps: Vec<StepKind>,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.status != Status::Confirmed {
            return Err(BookingError::IllegalTransition(
                "modification delta-sagas require status = CONFIRMED".to_string(),
            ));
        }
        let new_included = new_components.included();
        for component in self.components.included() {
            if !new_included.contains(&component) {
                return Err(BookingError::Validation(format!(
                    "removing {component} from a confirmed booking is not supported"
                )));
            }
        }
        for component in new_included {
            let state = self.sub_state_for_component_mut(component);
            if !state.required {
                *state = SubServiceState::required();
            }
        }

        self.components = new_components;
        self.ledger.extend_plan(delta_steps);
        self.ledger.set_phase(Phase::Forward);
        self.status = Status::Pending;
        self.audit.append(
            "start_modification",
            serde_json::json!({"components": &self.components}),
            Actor::Customer,
            now,
        );
        Ok(())
    }
}

/// The outcome of a successfully completed step, as reported by the engine.
#[derive(Debug, Clone, Default)]
pub struct CompleteStepResult {
    /// Downstream-assigned identifier, if the step produces one.
    pub downstream_id: Option<String>,
    /// Downstream-assigned confirmation number, if the step produces one.
    pub confirmation_number: Option<String>,
    /// Raw response payload, recorded in the ledger's `completed` entry.
    pub payload: serde_json::Value,
}

/// A delta applied to a booking's pricing breakdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct PricingDelta {
    /// Change to subtotal.
    pub subtotal: i64,
    /// Change to taxes.
    pub taxes: i64,
    /// Change to fees.
    pub fees: i64,
    /// Change to discounts.
    pub discounts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_travel() -> Travel {
        Travel {
            departure_date: NaiveDate::from_ymd_opt(2026, 8, 1).expect("valid date"),
            return_date: NaiveDate::from_ymd_opt(2026, 8, 8),
            departure_location: "SFO".to_string(),
            return_location: "JFK".to_string(),
            passengers: Passengers { adults: 1, children: 0, infants: 0 },
            rooms: 1,
        }
    }

    fn sample_contact() -> Contact {
        Contact {
            email: "guest@example.com".to_string(),
            phone: "+10000000000".to_string(),
            locale: "en-US".to_string(),
        }
    }

    fn sample_components() -> Components {
        Components {
            flight: Some(ComponentRequest { selection: serde_json::json!({"fare": "F1"}) }),
            hotel: Some(ComponentRequest { selection: serde_json::json!({"room": "H1"}) }),
            car: None,
        }
    }

    fn new_booking() -> Booking {
        Booking::new(
            "BN-1",
            "cust-1",
            sample_contact(),
            sample_components(),
            sample_travel(),
            Pricing::new(900, 80, 20, 0, "USD").expect("valid pricing"),
            Utc::now(),
        )
        .expect("valid booking")
    }

    #[test]
    fn rejects_booking_with_no_components() {
        let components = Components::default();
        let result = Booking::new(
            "BN-1",
            "cust-1",
            sample_contact(),
            components,
            sample_travel(),
            Pricing::new(100, 0, 0, 0, "USD").expect("valid pricing"),
            Utc::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_return_date_not_after_departure() {
        let mut travel = sample_travel();
        travel.return_date = travel.departure_date.pred_opt();
        let result = Booking::new(
            "BN-1",
            "cust-1",
            sample_contact(),
            sample_components(),
            travel,
            Pricing::new(100, 0, 0, 0, "USD").expect("valid pricing"),
            Utc::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn pricing_rejects_negative_total() {
        assert!(Pricing::new(100, 0, 0, 500, "USD").is_err());
    }

    #[test]
    fn start_saga_then_complete_step_advances_cursor() {
        let mut booking = new_booking();
        let plan = Plan::derive(&booking.components().included());
        booking.start_saga(plan, "worker-1", Utc::now()).expect("start_saga ok");
        let first = booking.ledger().current_step().expect("has a first step");
        booking
            .complete_step(first, CompleteStepResult::default(), "worker-1", Utc::now())
            .expect("complete_step ok");
        assert_eq!(booking.ledger().cursor(), 1);
        assert_eq!(booking.ledger().completed().len(), 1);
    }

    #[test]
    fn complete_step_rejects_out_of_order_step() {
        let mut booking = new_booking();
        let plan = Plan::derive(&booking.components().included());
        booking.start_saga(plan, "worker-1", Utc::now()).expect("start_saga ok");
        let result = booking.complete_step(StepKind::Capture, CompleteStepResult::default(), "worker-1", Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn every_transition_appends_exactly_one_audit_entry() {
        let mut booking = new_booking();
        let before = booking.audit().len();
        let plan = Plan::derive(&booking.components().included());
        booking.start_saga(plan, "worker-1", Utc::now()).expect("start_saga ok");
        assert_eq!(booking.audit().len(), before + 1);
    }

    #[test]
    fn finalize_confirmed_requires_forward_phase() {
        let mut booking = new_booking();
        let plan = Plan::derive(&booking.components().included());
        booking.start_saga(plan, "worker-1", Utc::now()).expect("start_saga ok");
        booking.finalize(Status::Confirmed, "worker-1", Utc::now()).expect("finalize ok");
        assert_eq!(booking.status(), Status::Confirmed);
        // Terminal phase is sticky.
        assert!(booking.finalize(Status::Cancelled, "worker-1", Utc::now()).is_err());
    }

    #[test]
    fn update_pricing_refused_after_confirmed() {
        let mut booking = new_booking();
        let plan = Plan::derive(&booking.components().included());
        booking.start_saga(plan, "worker-1", Utc::now()).expect("start_saga ok");
        booking.finalize(Status::Confirmed, "worker-1", Utc::now()).expect("finalize ok");
        let result = booking.update_pricing(PricingDelta { subtotal: 10, ..Default::default() }, "worker-1", Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn start_modification_requires_confirmed() {
        let mut booking = new_booking();
        let result = booking.start_modification(sample_components(), vec![StepKind::Hold(Component::Hotel)], "worker-1", Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn start_modification_rejects_dropping_a_component() {
        let mut booking = new_booking();
        let plan = Plan::derive(&booking.components().included());
        booking.start_saga(plan, "worker-1", Utc::now()).expect("start_saga ok");
        booking.finalize(Status::Confirmed, "worker-1", Utc::now()).expect("finalize ok");

        let narrower = Components {
            flight: booking.components().flight.clone(),
            hotel: None,
            car: None,
        };
        let result = booking.start_modification(narrower, vec![], "worker-1", Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn start_modification_reopens_forward_phase_for_the_engine_to_drive() {
        let mut booking = new_booking();
        let plan = Plan::derive(&booking.components().included());
        booking.start_saga(plan, "worker-1", Utc::now()).expect("start_saga ok");
        booking.finalize(Status::Confirmed, "worker-1", Utc::now()).expect("finalize ok");
        let transaction_id_before = booking.ledger().transaction_id();
        let completed_before = booking.ledger().completed().len();

        let mut changed = sample_components();
        changed.hotel = Some(ComponentRequest { selection: serde_json::json!({"room": "H2"}) });
        booking
            .start_modification(changed, vec![StepKind::Hold(Component::Hotel), StepKind::Confirm(Component::Hotel)], "worker-1", Utc::now())
            .expect("start_modification ok");

        assert_eq!(booking.status(), Status::Pending);
        assert!(matches!(booking.ledger().phase(), Phase::Forward));
        assert_eq!(booking.ledger().transaction_id(), transaction_id_before);
        assert_eq!(booking.ledger().completed().len(), completed_before);
        assert_eq!(booking.ledger().current_step(), Some(StepKind::Hold(Component::Hotel)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::ledger::SagaLedger;
    use crate::plan::{Component, Plan};
    use proptest::prelude::*;

    proptest! {
        /// `Pricing::new` either rejects a negative total outright, or produces
        /// a `total` exactly equal to `subtotal + taxes + fees - discounts`.
        #[test]
        fn pricing_total_always_matches_its_components_or_is_rejected(
            subtotal in -1_000_000i64..1_000_000,
            taxes in -1_000_000i64..1_000_000,
            fees in -1_000_000i64..1_000_000,
            discounts in -1_000_000i64..1_000_000,
        ) {
            let expected = subtotal + taxes + fees - discounts;
            match Pricing::new(subtotal, taxes, fees, discounts, "USD") {
                Ok(pricing) => {
                    prop_assert_eq!(pricing.total, expected);
                    prop_assert!(pricing.total >= 0);
                }
                Err(_) => prop_assert!(expected < 0),
            }
        }

        /// A `PricingDelta` applied via `update_pricing`-style arithmetic keeps
        /// `total` in sync with its components, the same invariant `recompute`
        /// is responsible for maintaining across the booking's lifetime.
        #[test]
        fn recompute_keeps_total_in_sync_after_a_delta(
            base in 0i64..1_000_000,
            delta_subtotal in -500_000i64..500_000,
        ) {
            let mut pricing = Pricing::new(base, 0, 0, 0, "USD").expect("non-negative base");
            pricing.subtotal += delta_subtotal;
            match pricing.recompute() {
                Ok(()) => prop_assert_eq!(pricing.total, pricing.subtotal),
                Err(_) => prop_assert!(pricing.subtotal < 0),
            }
        }

        /// After any sequence of completed steps, `cursor` equals the number of
        /// completed entries: the ledger never lets them drift apart.
        #[test]
        fn cursor_always_equals_completed_len(step_count in 0usize..6) {
            let components = [Component::Flight, Component::Hotel, Component::Car];
            let plan = Plan::derive(&components);
            let mut ledger = SagaLedger::new(crate::ids::TransactionId::new(), plan);
            let now = Utc::now();
            for _ in 0..step_count.min(ledger.plan().len()) {
                ledger.push_completed(
                    ledger.current_step().expect("step available"),
                    serde_json::json!({}),
                    now,
                );
            }
            prop_assert_eq!(ledger.cursor(), ledger.completed().len());
        }
    }
}
