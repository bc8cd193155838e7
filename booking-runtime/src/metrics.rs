//! Prometheus metrics for the service client, saga engine, and circuit
//! breaker/retry layers.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics server setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the Prometheus exporter.
    #[error("failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the exporter as the global recorder.
    #[error("failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind the metrics HTTP server.
    #[error("failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus metrics server exposing `/metrics` for scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server bound to `addr` (not yet started).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::Build` if the histogram buckets can't be
    /// configured, or `MetricsError::Install` if a recorder is already
    /// installed for a reason other than test re-initialization.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "metrics server started");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("metrics recorder already initialized, skipping");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// The installed handle, if `start` has run.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("booking_saga_steps_completed_total", "Total saga steps completed");
    describe_counter!("booking_saga_steps_failed_total", "Total saga steps failed");
    describe_counter!("booking_saga_compensations_total", "Total compensations attempted");
    describe_counter!("booking_saga_confirmed_total", "Total sagas that reached CONFIRMED");
    describe_counter!("booking_saga_cancelled_total", "Total sagas that reached CANCELLED");
    describe_counter!("booking_saga_failed_total", "Total sagas that reached FAILED");
    describe_histogram!("booking_saga_step_duration_seconds", "Time taken to execute a single step");

    describe_counter!("booking_service_client_calls_total", "Total outbound downstream calls");
    describe_counter!("booking_service_client_retries_total", "Total downstream call retries");
    describe_counter!("booking_service_client_errors_total", "Total classified downstream errors");
    describe_histogram!("booking_service_client_call_duration_seconds", "Downstream call latency");

    describe_gauge!("booking_circuit_breaker_state", "0=closed,1=half-open,2=open, per downstream");
    describe_counter!("booking_circuit_breaker_rejections_total", "Calls rejected by an open circuit");

    describe_counter!("booking_retry_attempts_total", "Retry attempts across all downstream calls");
    describe_counter!("booking_retry_exhausted_total", "Retries that exhausted max_retries");

    describe_counter!("booking_store_persist_total", "Total persist calls");
    describe_counter!("booking_store_version_conflicts_total", "Total VersionConflict outcomes");
    describe_histogram!("booking_store_persist_duration_seconds", "Time taken to persist a booking");

    describe_counter!("booking_event_bus_published_total", "Total events published");
    describe_counter!("booking_event_bus_publish_errors_total", "Total publish failures");
    describe_counter!("booking_outbox_drained_total", "Total outbox entries acked after a confirmed publish");
    describe_gauge!("booking_outbox_pending", "Bookings with at least one undrained outbox entry, as of the last drain scan");

    describe_counter!("booking_compensation_reconciliation_total", "Compensation failures flagged for operator reconciliation");
}

/// Saga engine metrics.
pub struct SagaMetrics;

impl SagaMetrics {
    /// Record a completed step.
    pub fn record_step_completed(duration: Duration) {
        counter!("booking_saga_steps_completed_total").increment(1);
        histogram!("booking_saga_step_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed step.
    pub fn record_step_failed() {
        counter!("booking_saga_steps_failed_total").increment(1);
    }

    /// Record a compensation attempt.
    pub fn record_compensation() {
        counter!("booking_saga_compensations_total").increment(1);
    }

    /// Record a terminal outcome.
    pub fn record_terminal(outcome: TerminalOutcome) {
        match outcome {
            TerminalOutcome::Confirmed => counter!("booking_saga_confirmed_total").increment(1),
            TerminalOutcome::Cancelled => counter!("booking_saga_cancelled_total").increment(1),
            TerminalOutcome::Failed => counter!("booking_saga_failed_total").increment(1),
        }
    }

    /// Record a compensation flagged for operator reconciliation.
    pub fn record_reconciliation_flag() {
        counter!("booking_compensation_reconciliation_total").increment(1);
    }
}

/// Which terminal bucket a saga ended in, for metrics.
#[derive(Debug, Clone, Copy)]
pub enum TerminalOutcome {
    /// Saga reached `CONFIRMED`.
    Confirmed,
    /// Saga reached `CANCELLED`.
    Cancelled,
    /// Saga reached `FAILED`.
    Failed,
}

/// Service client metrics.
pub struct ServiceClientMetrics;

impl ServiceClientMetrics {
    /// Record one outbound call attempt.
    pub fn record_call(duration: Duration) {
        counter!("booking_service_client_calls_total").increment(1);
        histogram!("booking_service_client_call_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a retry.
    pub fn record_retry() {
        counter!("booking_service_client_retries_total").increment(1);
        counter!("booking_retry_attempts_total").increment(1);
    }

    /// Record retries exhausted without success.
    pub fn record_retry_exhausted() {
        counter!("booking_retry_exhausted_total").increment(1);
    }

    /// Record a classified error.
    pub fn record_error() {
        counter!("booking_service_client_errors_total").increment(1);
    }
}

/// Store metrics.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record a persist call.
    pub fn record_persist(duration: Duration) {
        counter!("booking_store_persist_total").increment(1);
        histogram!("booking_store_persist_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a version conflict.
    pub fn record_version_conflict() {
        counter!("booking_store_version_conflicts_total").increment(1);
    }
}

/// Event bus metrics.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a successful publish.
    pub fn record_publish() {
        counter!("booking_event_bus_published_total").increment(1);
    }

    /// Record a publish failure.
    pub fn record_publish_error() {
        counter!("booking_event_bus_publish_errors_total").increment(1);
    }

    /// Record one outbox entry acked after a confirmed publish.
    pub fn record_outbox_drained() {
        counter!("booking_outbox_drained_total").increment(1);
    }

    /// Record the current count of bookings with at least one undrained
    /// outbox entry, as observed by the drain loop's latest scan.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_outbox_pending(count: usize) {
        gauge!("booking_outbox_pending").set(count as f64);
    }
}

/// Ensure metric descriptions are registered exactly once per process,
/// independent of whether `MetricsServer::start` has been called (tests may
/// record metrics without a running server).
pub fn ensure_described() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(register_metrics);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_server_starts_and_renders() {
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("valid addr");
        let mut server = MetricsServer::new(addr);
        let _ = server.start();
        SagaMetrics::record_step_completed(Duration::from_millis(5));
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("booking_saga_steps_completed_total"));
        }
    }
}
