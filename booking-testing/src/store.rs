//! In-memory `BookingStore`, modeled on the `booking-postgres` schema: a map
//! keyed by `booking_id` holding the latest `(Booking, Version)`, plus a
//! separate lease table mirroring the store's own `lease_owner`/
//! `lease_expires_at` columns (independent of whatever the booking's own
//! ledger happens to say, same as production).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use booking_core::booking::Booking;
use booking_core::clock::Clock;
use booking_core::ids::{BookingId, Version};
use booking_core::ledger::Lease;
use booking_core::store::{BookingStore, StoreError};
use chrono::{DateTime, Utc};

#[derive(Clone)]
struct Entry {
    booking: Booking,
    version: Version,
}

/// In-memory booking store for deterministic saga tests. Lease expiry reads
/// the same injected `Clock` the engine does, so a scenario drives both with
/// one `FixedClock::advance` rather than a real-time sleep.
#[derive(Clone)]
pub struct InMemoryBookingStore {
    bookings: Arc<Mutex<HashMap<BookingId, Entry>>>,
    leases: Arc<Mutex<HashMap<BookingId, Lease>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBookingStore {
    /// Create an empty store whose lease expiry is driven by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            bookings: Arc::new(Mutex::new(HashMap::new())),
            leases: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Number of bookings currently stored. Useful for test assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bookings.lock().unwrap().len()
    }

    /// Whether the store holds no bookings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bookings.lock().unwrap().is_empty()
    }

    /// Snapshot a booking directly, bypassing `load`'s `NotFound` error for
    /// tests that want an `Option`.
    #[must_use]
    pub fn peek(&self, booking_id: BookingId) -> Option<Booking> {
        self.bookings.lock().unwrap().get(&booking_id).map(|e| e.booking.clone())
    }
}

impl BookingStore for InMemoryBookingStore {
    fn load(
        &self,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<(Booking, Version), StoreError>> + Send + '_>> {
        let result = self
            .bookings
            .lock()
            .unwrap()
            .get(&booking_id)
            .map(|e| (e.booking.clone(), e.version))
            .ok_or(StoreError::NotFound(booking_id));
        Box::pin(async move { result })
    }

    fn persist(
        &self,
        booking: &Booking,
        expected_version: Version,
    ) -> Pin<Box<dyn Future<Output = Result<Version, StoreError>> + Send + '_>> {
        let booking_id = booking.booking_id();
        let booking = booking.clone();
        let result = {
            let mut bookings = self.bookings.lock().unwrap();
            match bookings.get(&booking_id) {
                Some(existing) if existing.version != expected_version => Err(StoreError::VersionConflict {
                    booking_id,
                    expected: expected_version,
                    found: existing.version,
                }),
                _ => {
                    let new_version = expected_version.next();
                    bookings.insert(booking_id, Entry { booking, version: new_version });
                    Ok(new_version)
                }
            }
        };
        Box::pin(async move { result })
    }

    fn scan_stranded(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>> {
        use booking_core::ledger::Phase;

        let bookings = self.bookings.lock().unwrap();
        let leases = self.leases.lock().unwrap();
        let stranded = bookings
            .iter()
            .filter(|(_, entry)| matches!(entry.booking.ledger().phase(), Phase::Forward | Phase::Compensating))
            .filter(|(id, _)| leases.get(id).is_none_or(|lease| lease.is_expired(now)))
            .map(|(id, _)| *id)
            .collect();
        Box::pin(async move { Ok(stranded) })
    }

    fn scan_expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>> {
        use booking_core::ledger::Phase;

        let bookings = self.bookings.lock().unwrap();
        let expired = bookings
            .iter()
            .filter(|(_, entry)| matches!(entry.booking.ledger().phase(), Phase::Forward))
            .filter(|(_, entry)| entry.booking.earliest_hold_expiry().is_some_and(|expiry| expiry < now))
            .map(|(id, _)| *id)
            .collect();
        Box::pin(async move { Ok(expired) })
    }

    fn scan_pending_outbox(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingId>, StoreError>> + Send + '_>> {
        let bookings = self.bookings.lock().unwrap();
        let pending = bookings
            .iter()
            .filter(|(_, entry)| !entry.booking.outbox().is_empty())
            .map(|(id, _)| *id)
            .collect();
        Box::pin(async move { Ok(pending) })
    }

    fn acquire_lease(
        &self,
        booking_id: BookingId,
        owner: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let owner = owner.to_string();
        let result = {
            let mut leases = self.leases.lock().unwrap();
            let now = self.clock.now();
            let held_by_other = leases
                .get(&booking_id)
                .is_some_and(|lease| lease.owner_id != owner && !lease.is_expired(now));

            if held_by_other {
                Err(StoreError::LeaseHeld(booking_id))
            } else {
                #[allow(clippy::cast_possible_wrap)]
                let expires_at = now + chrono::Duration::seconds(ttl.as_secs() as i64);
                leases.insert(booking_id, Lease { owner_id: owner, expires_at });
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::booking::{Components, ComponentRequest, Contact, Passengers, Pricing, Travel};

    fn sample_booking() -> Booking {
        let components = Components {
            flight: Some(ComponentRequest { selection: serde_json::json!({"fare_id": "F1"}) }),
            hotel: None,
            car: None,
        };
        let contact = Contact {
            email: "a@example.com".to_string(),
            phone: "+10000000000".to_string(),
            locale: "en-US".to_string(),
        };
        let travel = Travel {
            departure_date: chrono::NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            return_date: None,
            departure_location: "JFK".to_string(),
            return_location: "JFK".to_string(),
            passengers: Passengers { adults: 1, children: 0, infants: 0 },
            rooms: 1,
        };
        let pricing = Pricing::new(1000, 100, 50, 0, "USD").unwrap();

        Booking::new("BK-1", "cust-1", contact, components, travel, pricing, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let store = InMemoryBookingStore::new(Arc::new(crate::clock::test_clock()));
        let booking = sample_booking();
        let id = booking.booking_id();

        let version = store.persist(&booking, Version::INITIAL).await.unwrap();
        assert_eq!(version, Version::new(1));

        let (loaded, loaded_version) = store.load(id).await.unwrap();
        assert_eq!(loaded.booking_id(), id);
        assert_eq!(loaded_version, version);
    }

    #[tokio::test]
    async fn persist_with_stale_version_is_rejected() {
        let store = InMemoryBookingStore::new(Arc::new(crate::clock::test_clock()));
        let booking = sample_booking();
        store.persist(&booking, Version::INITIAL).await.unwrap();

        let err = store.persist(&booking, Version::INITIAL).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn acquire_lease_rejects_a_second_owner() {
        let store = InMemoryBookingStore::new(Arc::new(crate::clock::test_clock()));
        let id = BookingId::new();
        store.acquire_lease(id, "worker-a", Duration::from_secs(30)).await.unwrap();

        let err = store.acquire_lease(id, "worker-b", Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseHeld(_)));
    }

    #[tokio::test]
    async fn acquire_lease_is_reacquirable_once_the_clock_advances_past_ttl() {
        let clock = Arc::new(crate::clock::test_clock());
        let store = InMemoryBookingStore::new(clock.clone());
        let id = BookingId::new();
        store.acquire_lease(id, "worker-a", Duration::from_secs(30)).await.unwrap();

        clock.advance(chrono::Duration::seconds(31));

        store.acquire_lease(id, "worker-b", Duration::from_secs(30)).await.unwrap();
    }
}
