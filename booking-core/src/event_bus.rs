//! Contract for the outbound event bus adapter (C3): domain events for
//! observers (notification, analytics, audit), published at-least-once with
//! per-booking ordering.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::BookingId;
use crate::plan::StepKind;

/// A domain event emitted by a transition on the booking aggregate. Carries
/// `booking_id` and a monotonic `sequence` so at-least-once delivery can be
/// deduplicated by idempotent consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    /// Booking this event concerns. Also the partition/ordering key.
    pub booking_id: BookingId,
    /// Monotonically increasing per-booking sequence number.
    pub sequence: u64,
    /// When the causing transition was persisted.
    pub occurred_at: DateTime<Utc>,
    /// The event payload.
    pub kind: BookingEventKind,
}

/// An event queued on a `Booking`'s outbox, awaiting publication. Persisted
/// as part of the aggregate itself (see `Booking::enqueue_outbox`) so it
/// survives a crash between the state-changing write and the publish call —
/// the outbox is cleared entry-by-entry only once `BookingEventBus::publish`
/// confirms delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Matches the `BookingEvent::sequence` this entry will carry once drained.
    pub sequence: u64,
    /// When the causing transition was persisted.
    pub occurred_at: DateTime<Utc>,
    /// The event payload.
    pub kind: BookingEventKind,
}

/// The typed event payloads this system emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BookingEventKind {
    /// A new booking was submitted and persisted in `PENDING`.
    BookingCreated,
    /// A forward step completed successfully.
    StepCompleted {
        /// The step that completed.
        step: StepKind,
    },
    /// A forward step failed (permanently, or exhausted retries).
    StepFailed {
        /// The step that failed.
        step: StepKind,
        /// Human-readable explanation.
        error: String,
    },
    /// The saga entered the compensation phase.
    SagaCompensating,
    /// All forward steps completed; booking is confirmed.
    BookingConfirmed,
    /// Compensation completed cleanly; booking is cancelled.
    BookingCancelled,
    /// Compensation left an unresolved failure; booking is failed.
    BookingFailed,
    /// A refund (saga rollback, or a standalone refund request) was issued.
    RefundIssued {
        /// Amount refunded, in minor currency units.
        amount: i64,
    },
    /// A modification delta-saga was planned against a `CONFIRMED` booking.
    ModificationStarted,
}

/// Errors from event bus operations.
#[derive(Error, Debug)]
pub enum EventBusError {
    /// The event could not be published to the transport.
    #[error("publish failed: {0}")]
    PublishFailed(String),
    /// The transport connection is unavailable.
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Publishes domain events to observers. Delivery is at-least-once; per-
/// `booking_id` ordering is preserved; there is no cross-booking ordering
/// guarantee.
///
/// Publication is expected to be wired through an outbox: an event is
/// appended to the aggregate's outbox within the same version-advancing
/// write C2 performs, then drained asynchronously by a caller of `publish`.
/// A failure to drain does not block saga progress but triggers redelivery,
/// which is why consumers must be idempotent on `(booking_id, sequence)`.
pub trait BookingEventBus: Send + Sync {
    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError` if the transport rejects or cannot reach the
    /// event. Callers should leave the event in the outbox for redelivery on
    /// failure rather than drop it.
    fn publish(
        &self,
        event: BookingEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;
}
