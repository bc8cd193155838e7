//! Worker pool and crash-recovery loop. Neither holds any authoritative
//! in-memory state about a saga: every iteration re-reads the booking from
//! the store and re-acquires its lease, so a worker can die at any point
//! without corrupting another worker's progress.

use std::sync::Arc;

use booking_core::ids::BookingId;
use booking_core::store::BookingStore;
use tokio::sync::mpsc;

use crate::config::BookingRuntimeConfig;
use crate::engine::SagaEngine;

/// Fixed-size pool of tasks draining a queue of `booking_id`s to drive.
pub struct WorkerPool {
    sender: mpsc::Sender<BookingId>,
}

impl WorkerPool {
    /// Spawn `concurrency` tasks, each calling `engine.drive` for whatever
    /// `booking_id` it receives next. Errors from `drive` are logged; a
    /// failed drive attempt leaves the booking exactly where the store
    /// has it; the recovery loop or a future enqueue will retry it.
    #[must_use]
    pub fn spawn(engine: Arc<SagaEngine>, concurrency: usize) -> Self {
        let (sender, receiver) = mpsc::channel(1024);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for worker in 0..concurrency.max(1) {
            let engine = Arc::clone(&engine);
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                loop {
                    let booking_id = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    let Some(booking_id) = booking_id else {
                        break;
                    };
                    if let Err(err) = engine.drive(booking_id).await {
                        tracing::warn!(worker, %booking_id, error = %err, "drive attempt ended with an error");
                    }
                }
            });
        }

        Self { sender }
    }

    /// Enqueue a booking for a worker to drive. Back-pressures if every
    /// worker is busy and the queue is full.
    ///
    /// # Errors
    ///
    /// Returns an error if every worker task has exited (e.g. panicked).
    pub async fn enqueue(&self, booking_id: BookingId) -> Result<(), mpsc::error::SendError<BookingId>> {
        self.sender.send(booking_id).await
    }
}

/// Periodically scans the store for stranded sagas (lease expired while
/// still `FORWARD`/`COMPENSATING`) and re-enqueues them. This is how a
/// crashed worker's in-flight bookings get picked back up: recovery never
/// trusts anything but `BookingStore::scan_stranded`.
pub async fn run_recovery_loop(store: Arc<dyn BookingStore>, pool: Arc<WorkerPool>, config: BookingRuntimeConfig, clock: Arc<dyn booking_core::clock::Clock>) {
    let mut interval = tokio::time::interval(config.recovery_scan_interval);
    loop {
        interval.tick().await;
        let now = clock.now();
        match store.scan_stranded(now).await {
            Ok(stranded) => {
                for booking_id in stranded {
                    tracing::info!(%booking_id, "recovered stranded saga, re-enqueueing");
                    if pool.enqueue(booking_id).await.is_err() {
                        tracing::error!("worker pool unreachable, stopping recovery loop");
                        return;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "stranded-saga scan failed");
            }
        }
    }
}

/// Periodically scans the store for bookings whose current hold has expired
/// while still `FORWARD`, and drives each directly into compensation via
/// `SagaEngine::expire_stale_hold` rather than going through the worker
/// pool's queue — this path doesn't need the ordinary forward-execution
/// entry point, only the failure synthesis `drive` itself never reaches on
/// its own (nothing ever calls the downstream to notice a hold timed out).
pub async fn run_hold_expiry_loop(
    store: Arc<dyn BookingStore>,
    engine: Arc<SagaEngine>,
    config: BookingRuntimeConfig,
    clock: Arc<dyn booking_core::clock::Clock>,
) {
    let mut interval = tokio::time::interval(config.recovery_scan_interval);
    loop {
        interval.tick().await;
        let now = clock.now();
        match store.scan_expired_holds(now).await {
            Ok(expired) => {
                for booking_id in expired {
                    tracing::info!(%booking_id, "hold expired before confirmation, failing step");
                    if let Err(err) = engine.expire_stale_hold(booking_id).await {
                        tracing::warn!(%booking_id, error = %err, "failed to synthesize hold-expired failure");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "hold-expiry scan failed");
            }
        }
    }
}

/// Periodically scans the store for bookings carrying an undrained outbox
/// entry and retries publication. This is the other half of the outbox
/// pattern: `SagaEngine` enqueues and makes a best-effort drain attempt
/// inline after every version-advancing write, but a publish that fails
/// right then (broker unreachable, timeout) only gets retried here.
pub async fn run_outbox_drain_loop(
    store: Arc<dyn BookingStore>,
    engine: Arc<SagaEngine>,
    config: BookingRuntimeConfig,
) {
    let mut interval = tokio::time::interval(config.outbox_drain_interval);
    loop {
        interval.tick().await;
        match store.scan_pending_outbox().await {
            Ok(pending) => {
                crate::metrics::EventBusMetrics::record_outbox_pending(pending.len());
                for booking_id in pending {
                    if let Err(err) = engine.drain_pending_outbox(booking_id).await {
                        tracing::warn!(%booking_id, error = %err, "failed to drain outbox");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "pending-outbox scan failed");
            }
        }
    }
}
