//! The saga ledger embedded in a `Booking`: plan, cursor, step outcomes, and
//! lease ownership. Append-only except for `cursor`, `phase`, the current
//! step's `retry_count`, and `lease`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TransactionId;
use crate::plan::{CompensationKind, Plan, StepKind};

/// Where a saga is in its lifecycle. Terminal phases (`Done`, `Aborted`) are
/// sticky: no transition leads out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Driving the plan forward, one step at a time.
    Forward,
    /// Walking completed steps in reverse, issuing compensations.
    Compensating,
    /// Terminal: saga finished (confirmed, or cleanly cancelled).
    Done,
    /// Terminal: saga finished with an unresolved compensation failure.
    Aborted,
}

impl Phase {
    /// Whether the saga can still make forward or compensating progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

/// A step that completed successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedStep {
    /// The step that completed.
    pub step: StepKind,
    /// Downstream response body, opaque to the ledger.
    pub result_payload: serde_json::Value,
    /// When the step completed.
    pub completed_at: DateTime<Utc>,
}

/// A step that failed (permanently, or exhausted its retries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedStep {
    /// The step that failed.
    pub step: StepKind,
    /// Human-readable explanation.
    pub error: String,
    /// When the step failed.
    pub failed_at: DateTime<Utc>,
}

/// Outcome of a single compensation attempt, recorded append-only during the
/// compensation walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// The compensation that was attempted.
    pub compensation: CompensationKind,
    /// Whether it ultimately succeeded (after retries) or exhausted them.
    pub outcome: CompensationOutcome,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Result of a compensation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompensationOutcome {
    /// The compensation succeeded.
    Succeeded,
    /// The compensation failed after exhausting retries; flagged for
    /// reconciliation. Compensation of other steps continues regardless.
    Failed {
        /// Explanation of the final failure.
        message: String,
    },
    /// The step had no compensation (e.g. `Notify`) and was skipped.
    Skipped,
}

/// Time-bounded exclusive ownership of a booking, enabling single-writer
/// semantics across a worker cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Identity of the worker holding the lease.
    pub owner_id: String,
    /// When the lease expires if not renewed.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The saga's working state, embedded in `Booking`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaLedger {
    transaction_id: TransactionId,
    plan: Plan,
    cursor: usize,
    completed: Vec<CompletedStep>,
    failed: Vec<FailedStep>,
    compensations: Vec<CompensationRecord>,
    phase: Phase,
    retry_count: u32,
    lease: Option<Lease>,
    cancellation_requested: bool,
}

impl SagaLedger {
    /// Default bound on retries for a single step (forward or compensation).
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Start a new ledger with the given plan, in `Forward` phase at cursor 0.
    #[must_use]
    pub fn new(transaction_id: TransactionId, plan: Plan) -> Self {
        Self {
            transaction_id,
            plan,
            cursor: 0,
            completed: Vec::new(),
            failed: Vec::new(),
            compensations: Vec::new(),
            phase: Phase::Forward,
            retry_count: 0,
            lease: None,
            cancellation_requested: false,
        }
    }

    /// The transaction this ledger tracks.
    #[must_use]
    pub const fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// The step plan.
    #[must_use]
    pub const fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Index of the next step to attempt.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Steps completed so far, in execution order.
    #[must_use]
    pub fn completed(&self) -> &[CompletedStep] {
        &self.completed
    }

    /// Steps that failed, in the order they failed.
    #[must_use]
    pub fn failed(&self) -> &[FailedStep] {
        &self.failed
    }

    /// Compensation outcomes recorded so far, in the order attempted.
    #[must_use]
    pub fn compensations(&self) -> &[CompensationRecord] {
        &self.compensations
    }

    /// Current saga phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Retry count on the step currently at `cursor`.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Current lease, if any.
    #[must_use]
    pub const fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// The step currently at `cursor`, if the plan has one.
    #[must_use]
    pub fn current_step(&self) -> Option<StepKind> {
        self.plan.get(self.cursor)
    }

    /// Whether every step in the plan has completed.
    #[must_use]
    pub fn is_forward_complete(&self) -> bool {
        self.cursor >= self.plan.len()
    }

    pub(crate) fn push_completed(&mut self, step: StepKind, result_payload: serde_json::Value, now: DateTime<Utc>) {
        self.completed.push(CompletedStep {
            step,
            result_payload,
            completed_at: now,
        });
        self.cursor += 1;
        self.retry_count = 0;
    }

    pub(crate) fn push_failed(&mut self, step: StepKind, error: String, now: DateTime<Utc>) {
        self.failed.push(FailedStep {
            step,
            error,
            failed_at: now,
        });
    }

    pub(crate) fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn push_compensation(
        &mut self,
        compensation: CompensationKind,
        outcome: CompensationOutcome,
        now: DateTime<Utc>,
    ) {
        self.compensations.push(CompensationRecord {
            compensation,
            outcome,
            recorded_at: now,
        });
    }

    pub(crate) fn set_lease(&mut self, lease: Option<Lease>) {
        self.lease = lease;
    }

    /// Append steps to the plan without disturbing `cursor` or `completed` —
    /// used by a modification delta-saga to continue this same saga rather
    /// than starting a new `transaction_id`.
    pub(crate) fn extend_plan(&mut self, additional: Vec<StepKind>) {
        self.plan.extend(additional);
    }

    /// Whether a customer-initiated cancellation is pending. Checked by the
    /// forward loop at every step boundary.
    #[must_use]
    pub const fn cancellation_requested(&self) -> bool {
        self.cancellation_requested
    }

    pub(crate) fn set_cancellation_requested(&mut self, value: bool) {
        self.cancellation_requested = value;
    }

    /// Whether any recorded compensation ended in `Failed`.
    #[must_use]
    pub fn has_unresolved_compensation(&self) -> bool {
        self.compensations
            .iter()
            .any(|c| matches!(c.outcome, CompensationOutcome::Failed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Component;

    #[test]
    fn new_ledger_starts_forward_at_cursor_zero() {
        let ledger = SagaLedger::new(TransactionId::new(), Plan::derive(&[Component::Flight]));
        assert_eq!(ledger.cursor(), 0);
        assert!(matches!(ledger.phase(), Phase::Forward));
    }

    #[test]
    fn lease_expiry_is_relative_to_now() {
        let now = Utc::now();
        let lease = Lease {
            owner_id: "worker-1".to_string(),
            expires_at: now - chrono::Duration::seconds(1),
        };
        assert!(lease.is_expired(now));
    }
}
