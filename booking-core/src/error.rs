//! Error taxonomy surfaced by the orchestration core (see the error handling
//! design: every variant here maps to a handling policy the saga engine applies).

use thiserror::Error;

use crate::ids::{BookingId, Version};

/// Errors the core can surface to a caller or to itself during saga execution.
///
/// Each variant carries the handling policy in its doc comment rather than in
/// a separate lookup table, since the policy is fixed per variant:
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Submitted booking violates an invariant. Rejected synchronously; no
    /// saga is started.
    #[error("booking failed validation: {0}")]
    Validation(String),

    /// Downstream reachable but temporarily failing. Retried with backoff up
    /// to `max_retries`.
    #[error("transient failure on step {step}: {message}")]
    Transient {
        /// Step that failed.
        step: String,
        /// Downstream-supplied or synthesized explanation.
        message: String,
    },

    /// Downstream rejected the request definitively. Saga enters compensation.
    #[error("permanent failure on step {step}: {message}")]
    Permanent {
        /// Step that failed.
        step: String,
        /// Downstream-supplied or synthesized explanation.
        message: String,
    },

    /// A held resource expired before its confirm step ran. Handled the same
    /// as `Permanent` but surfaced with a distinct code for diagnostics.
    #[error("hold for step {step} expired before confirmation")]
    HoldExpired {
        /// Step whose hold expired.
        step: String,
    },

    /// The saga has run longer than the booking-level deadline without
    /// reaching a terminal state. Handled the same as `Permanent`: the
    /// current step is abandoned and compensation begins.
    #[error("booking-level deadline exceeded at step {step}")]
    DeadlineExceeded {
        /// Step in flight (or next to run) when the deadline was hit.
        step: String,
    },

    /// A rollback could not complete. The booking ends `FAILED` rather than
    /// `CANCELLED` and is flagged for operator reconciliation.
    #[error("compensation failed for step {step}: {message}")]
    CompensationFailed {
        /// Step whose compensation failed.
        step: String,
        /// Downstream-supplied or synthesized explanation.
        message: String,
    },

    /// Version conflict on persist. The caller must reload and re-plan from
    /// durable state rather than overwrite another worker's progress.
    #[error("version conflict on booking {booking_id}: expected {expected}, found {found}")]
    Conflict {
        /// Booking whose persist was rejected.
        booking_id: BookingId,
        /// Version the caller expected.
        expected: Version,
        /// Version actually stored.
        found: Version,
    },

    /// Another worker now owns the booking's lease. The caller abandons the
    /// attempt; the new owner proceeds.
    #[error("lease for booking {0} is held by another owner")]
    LeaseLost(BookingId),

    /// The requested transition is not legal from the aggregate's current
    /// status/phase.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// The booking referenced by an operation does not exist.
    #[error("booking {0} not found")]
    NotFound(BookingId),
}

impl BookingError {
    /// Whether the engine should retry the in-flight step rather than begin
    /// compensation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether this error, once classified, should drive the saga into the
    /// compensation phase.
    #[must_use]
    pub const fn triggers_compensation(&self) -> bool {
        matches!(self, Self::Permanent { .. } | Self::HoldExpired { .. } | Self::DeadlineExceeded { .. })
    }
}
