//! Contract for surfacing a compensation that exhausted its retries to an
//! operator (C5). The saga's own ledger already records a `Failed`
//! compensation outcome as part of the booking's audit trail; this trait is
//! the separate, operator-facing side of that same event, so a human (or an
//! out-of-band job) has somewhere durable to look for what still owes a
//! customer a refund or a release.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ids::BookingId;
use crate::plan::CompensationKind;

/// One compensation that failed after exhausting retries, as handed to a
/// `ReconciliationSink`.
#[derive(Debug, Clone)]
pub struct CompensationFailureReport {
    /// Booking the compensation belonged to.
    pub booking_id: BookingId,
    /// The compensation step that failed.
    pub compensation: CompensationKind,
    /// Final error message from the last attempt.
    pub message: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

/// Errors from a reconciliation-sink write.
#[derive(Error, Debug)]
pub enum ReconciliationSinkError {
    /// Underlying storage backend failure.
    #[error("reconciliation sink backend error: {0}")]
    Backend(String),
}

/// Durable home for compensation failures awaiting manual or out-of-band
/// resolution. Production implementation lives in `booking-postgres`, atop
/// `CompensationReconciliationQueue`; `booking-testing` provides an in-memory
/// fake for assertions.
pub trait ReconciliationSink: Send + Sync {
    /// Record one unresolved compensation failure.
    ///
    /// # Errors
    ///
    /// Returns `ReconciliationSinkError::Backend` if the write fails. Callers
    /// should log and move on rather than fail the saga over this — the
    /// booking's own ledger is still the authoritative record either way.
    fn record_failure(
        &self,
        report: CompensationFailureReport,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReconciliationSinkError>> + Send + '_>>;
}
