//! Reconciliation queue for compensations that failed after exhausting
//! retries. Mirrors a dead-letter queue: the saga itself moves on (other
//! steps keep compensating), but an unresolved entry here means a human or
//! an out-of-band job still owes the customer a refund or a release.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use booking_core::ids::BookingId;
use booking_core::plan::CompensationKind;
use booking_core::reconciliation::{CompensationFailureReport, ReconciliationSink, ReconciliationSinkError};

/// Status of a compensation-failure entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationStatus {
    /// Not yet looked at.
    Pending,
    /// Picked up by an operator or reconciliation job.
    Processing,
    /// Resolved, with notes on how.
    Resolved,
    /// Will not be resolved (e.g. the charge was written off).
    Discarded,
}

impl ReconciliationStatus {
    /// Database string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database string form.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, ReconciliationError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            other => Err(ReconciliationError::Backend(format!("unknown reconciliation status: {other}"))),
        }
    }
}

/// A compensation that failed after exhausting retries, awaiting manual or
/// out-of-band resolution.
#[derive(Debug, Clone)]
pub struct CompensationFailure {
    /// Row id.
    pub id: i64,
    /// Booking the compensation belonged to.
    pub booking_id: BookingId,
    /// The compensation step that failed.
    pub compensation: CompensationKind,
    /// Final error message from the last attempt.
    pub message: String,
    /// Current status.
    pub status: ReconciliationStatus,
    /// When it was first recorded.
    pub first_failed_at: DateTime<Utc>,
    /// When it was resolved, if it has been.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it.
    pub resolved_by: Option<String>,
    /// Free-text notes on the resolution.
    pub resolution_notes: Option<String>,
}

/// Errors from reconciliation-queue operations.
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    /// Underlying storage backend failure, including unexpected row shapes.
    #[error("reconciliation backend error: {0}")]
    Backend(String),
}

/// `PostgreSQL`-backed queue of unresolved compensation failures.
pub struct CompensationReconciliationQueue {
    pool: PgPool,
}

impl CompensationReconciliationQueue {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a compensation failure for later reconciliation.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn add_entry(
        &self,
        booking_id: BookingId,
        compensation: CompensationKind,
        message: &str,
    ) -> Result<i64, ReconciliationError> {
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO compensation_failures (booking_id, compensation, message)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(booking_id.as_uuid())
        .bind(compensation.to_string())
        .bind(message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ReconciliationError::Backend(e.to_string()))?;

        tracing::warn!(
            reconciliation_id = id.0,
            booking_id = %booking_id,
            compensation = %compensation,
            error = message,
            "compensation failed after exhausting retries, queued for reconciliation"
        );
        metrics::counter!("booking_compensation_reconciliation_total").increment(1);

        Ok(id.0)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row can't be decoded.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<CompensationFailure>, ReconciliationError> {
        self.list_by_status(ReconciliationStatus::Pending, limit).await
    }

    /// List entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row can't be decoded.
    pub async fn list_by_status(
        &self,
        status: ReconciliationStatus,
        limit: usize,
    ) -> Result<Vec<CompensationFailure>, ReconciliationError> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            r"
            SELECT id, booking_id, compensation, message, status,
                   first_failed_at, resolved_at, resolved_by, resolution_notes
            FROM compensation_failures
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReconciliationError::Backend(e.to_string()))?;

        rows.iter().map(Self::row_to_failure).collect()
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_resolved(&self, id: i64, resolved_by: &str, notes: &str) -> Result<(), ReconciliationError> {
        sqlx::query(
            r"
            UPDATE compensation_failures
            SET status = 'resolved', resolved_at = NOW(), resolved_by = $2, resolution_notes = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(resolved_by)
        .bind(notes)
        .execute(&self.pool)
        .await
        .map_err(|e| ReconciliationError::Backend(e.to_string()))?;

        metrics::counter!("booking_compensation_reconciliation_resolved_total").increment(1);
        Ok(())
    }

    /// Mark an entry discarded (will not be resolved).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_discarded(&self, id: i64, resolved_by: &str, notes: &str) -> Result<(), ReconciliationError> {
        sqlx::query(
            r"
            UPDATE compensation_failures
            SET status = 'discarded', resolved_at = NOW(), resolved_by = $2, resolution_notes = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(resolved_by)
        .bind(notes)
        .execute(&self.pool)
        .await
        .map_err(|e| ReconciliationError::Backend(e.to_string()))?;

        Ok(())
    }

    /// Count pending entries, e.g. for a health/alerting gauge.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_pending(&self) -> Result<i64, ReconciliationError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM compensation_failures WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ReconciliationError::Backend(e.to_string()))
    }

    fn row_to_failure(row: &sqlx::postgres::PgRow) -> Result<CompensationFailure, ReconciliationError> {
        let status_str: String = row.get("status");
        let compensation_str: String = row.get("compensation");

        Ok(CompensationFailure {
            id: row.get("id"),
            booking_id: BookingId::from_uuid(row.get("booking_id")),
            compensation: parse_compensation(&compensation_str)?,
            message: row.get("message"),
            status: ReconciliationStatus::parse(&status_str)?,
            first_failed_at: row.get("first_failed_at"),
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

impl ReconciliationSink for CompensationReconciliationQueue {
    fn record_failure(
        &self,
        report: CompensationFailureReport,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReconciliationSinkError>> + Send + '_>> {
        Box::pin(async move {
            self.add_entry(report.booking_id, report.compensation, &report.message)
                .await
                .map(|_id| ())
                .map_err(|e| ReconciliationSinkError::Backend(e.to_string()))
        })
    }
}

fn parse_compensation(s: &str) -> Result<CompensationKind, ReconciliationError> {
    use booking_core::plan::Component;

    match s {
        "release_hold_flight" => Ok(CompensationKind::ReleaseHold(Component::Flight)),
        "release_hold_hotel" => Ok(CompensationKind::ReleaseHold(Component::Hotel)),
        "release_hold_car" => Ok(CompensationKind::ReleaseHold(Component::Car)),
        "void_authorization" => Ok(CompensationKind::VoidAuthorization),
        "cancel_booking_flight" => Ok(CompensationKind::CancelBooking(Component::Flight)),
        "cancel_booking_hotel" => Ok(CompensationKind::CancelBooking(Component::Hotel)),
        "cancel_booking_car" => Ok(CompensationKind::CancelBooking(Component::Car)),
        "refund" => Ok(CompensationKind::Refund),
        other => Err(ReconciliationError::Backend(format!("unknown compensation kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [
            ReconciliationStatus::Pending,
            ReconciliationStatus::Processing,
            ReconciliationStatus::Resolved,
            ReconciliationStatus::Discarded,
        ] {
            assert_eq!(ReconciliationStatus::parse(status.as_str()).unwrap(), status);
        }
    }
}
