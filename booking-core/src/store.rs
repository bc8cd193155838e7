//! Contract for the durable booking/ledger state store (C2).
//!
//! The trait is deliberately narrow: load, persist-with-optimistic-concurrency,
//! scan for stranded sagas, and lease acquisition. Production implementation
//! lives in `booking-postgres`; an in-memory fake lives in `booking-testing`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::booking::Booking;
use crate::ids::{BookingId, Version};

/// Errors from state-store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No booking exists for the given id.
    #[error("booking {0} not found")]
    NotFound(BookingId),

    /// `persist` was called with a stale `expected_version`: another worker
    /// has already written a newer version. The caller must reload and
    /// re-plan rather than overwrite.
    #[error("version conflict for booking {booking_id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Booking whose persist was rejected.
        booking_id: BookingId,
        /// Version the caller expected.
        expected: Version,
        /// Version actually stored.
        found: Version,
    },

    /// `acquire_lease` was called but another owner currently holds an
    /// unexpired lease.
    #[error("lease for booking {0} is already held")]
    LeaseHeld(BookingId),

    /// Underlying storage backend failure.
    #[error("store backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable home of the booking aggregate and its saga ledger, plus lease
/// ownership for crash recovery.
///
/// Reads and writes are linearizable per `booking_id`. `persist` is the only
/// mutation path; it always increments the booking's version, and a stale
/// `expected_version` is rejected rather than silently overwritten so a
/// crashed and resumed worker never clobbers another worker's progress.
pub trait BookingStore: Send + Sync {
    /// Load a booking by id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such booking exists.
    fn load(
        &self,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<(Booking, Version), StoreError>> + Send + '_>>;

    /// Durably write `booking`, failing if `expected_version` is stale.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::VersionConflict` if another write has advanced
    /// the booking's version since `expected_version` was read.
    fn persist(
        &self,
        booking: &Booking,
        expected_version: Version,
    ) -> Pin<Box<dyn Future<Output = Result<Version, StoreError>> + Send + '_>>;

    /// Bookings whose lease has expired while still `FORWARD` or
    /// `COMPENSATING` — candidates for crash recovery.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on a storage failure.
    fn scan_stranded(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>>;

    /// Acquire (or renew, if already held by `owner`) exclusive ownership of
    /// a booking for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LeaseHeld` if a different owner currently holds
    /// an unexpired lease.
    fn acquire_lease(
        &self,
        booking_id: BookingId,
        owner: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Bookings still in `FORWARD` phase whose current sub-service hold has
    /// expired — candidates for a synthesized `HoldExpired` failure.
    ///
    /// Implementations track this independently of `scan_stranded`: a hold
    /// can expire well before its lease does.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on a storage failure.
    fn scan_expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>>;

    /// Bookings carrying at least one undrained `Booking::outbox` entry —
    /// candidates for the outbox-drain loop to retry, independent of saga
    /// phase (a booking's final event can still be pending after it reaches
    /// a terminal state).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on a storage failure.
    fn scan_pending_outbox(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>>;
}
