//! In-memory `ReconciliationSink` that records every reported compensation
//! failure for assertions instead of writing it to an operator-facing table.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use booking_core::reconciliation::{CompensationFailureReport, ReconciliationSink, ReconciliationSinkError};

/// Captures reported compensation failures in arrival order.
#[derive(Clone, Default)]
pub struct InMemoryReconciliationSink {
    reports: Arc<Mutex<Vec<CompensationFailureReport>>>,
}

impl InMemoryReconciliationSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All failures reported so far, in order.
    #[must_use]
    pub fn reports(&self) -> Vec<CompensationFailureReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl ReconciliationSink for InMemoryReconciliationSink {
    fn record_failure(
        &self,
        report: CompensationFailureReport,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReconciliationSinkError>> + Send + '_>> {
        self.reports.lock().unwrap().push(report);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::ids::BookingId;
    use booking_core::plan::{CompensationKind, Component};
    use chrono::Utc;

    #[tokio::test]
    async fn record_failure_appends_in_order() {
        let sink = InMemoryReconciliationSink::new();
        let booking_id = BookingId::new();

        sink.record_failure(CompensationFailureReport {
            booking_id,
            compensation: CompensationKind::ReleaseHold(Component::Flight),
            message: "inventory unreachable".to_string(),
            failed_at: Utc::now(),
        })
        .await
        .unwrap();

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].booking_id, booking_id);
    }
}
