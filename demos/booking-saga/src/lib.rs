//! Booking Saga Demo
//!
//! Wires a `SagaEngine` entirely from in-memory test doubles — no database,
//! no broker, no network call — so the full saga (forward execution,
//! retries, compensation, crash/resume, concurrent cancellation) can be
//! exercised end to end from a single process. See `tests/scenarios.rs` for
//! the seed scenarios this harness was built for.
//!
//! # Usage
//!
//! ```
//! use booking_saga_demo::{flight_and_hotel_booking, harness};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let h = harness();
//! h.service_client.push_success("flight-inventory", "hold", serde_json::json!({"id": "hold-f1"}));
//! h.service_client.push_success("hotel-inventory", "hold", serde_json::json!({"id": "hold-h1"}));
//! h.service_client.push_success("payment", "authorize", serde_json::json!({"id": "auth-1"}));
//! h.service_client.push_success("flight-inventory", "confirm", serde_json::json!({"confirmation_number": "FL1"}));
//! h.service_client.push_success("hotel-inventory", "confirm", serde_json::json!({"confirmation_number": "HT1"}));
//! h.service_client.push_success("payment", "capture", serde_json::json!({"id": "charge-1"}));
//! h.service_client.push_success("notification", "send_confirmation", serde_json::json!({}));
//!
//! let booking_id = h.engine.submit(flight_and_hotel_booking()).await?;
//! h.engine.drive(booking_id).await?;
//! assert_eq!(h.store.peek(booking_id).unwrap().status(), booking_core::booking::Status::Confirmed);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use booking_core::booking::{Booking, Components, ComponentRequest, Contact, Passengers, Pricing, Travel};
use booking_core::clock::Clock;
use booking_core::event_bus::BookingEventBus;
use booking_core::reconciliation::ReconciliationSink;
use booking_core::service_client::ServiceClient;
use booking_core::store::BookingStore;
use booking_runtime::{BookingRuntimeConfig, SagaEngine};
use booking_testing::{
    test_clock, FixedClock, InMemoryBookingEventBus, InMemoryBookingStore, InMemoryReconciliationSink, ScriptedServiceClient,
};
use chrono::{NaiveDate, Utc};

/// The engine under test plus handles to every collaborator it was built
/// from, so a scenario can script responses, advance the clock, and inspect
/// captured state and events.
pub struct Harness {
    /// The engine under test.
    pub engine: Arc<SagaEngine>,
    /// Durable booking state, in memory.
    pub store: Arc<InMemoryBookingStore>,
    /// Scripted downstream responses.
    pub service_client: Arc<ScriptedServiceClient>,
    /// Captured outbound events.
    pub event_bus: Arc<InMemoryBookingEventBus>,
    /// Compensation failures flagged for operator reconciliation.
    pub reconciliation: Arc<InMemoryReconciliationSink>,
    /// The clock the engine reads `now()` from.
    pub clock: Arc<FixedClock>,
}

/// Runtime configuration tuned for tests: retries and lease renewal happen
/// on millisecond timescales rather than the production defaults, so a
/// scenario that exhausts retries doesn't sit through multi-second sleeps.
#[must_use]
pub fn fast_config() -> BookingRuntimeConfig {
    BookingRuntimeConfig {
        call_deadline: Duration::from_millis(50),
        retry_base_delay: Duration::from_millis(1),
        retry_factor: 2.0,
        retry_max_delay: Duration::from_millis(5),
        lease_ttl: Duration::from_secs(30),
        ..BookingRuntimeConfig::default()
    }
}

/// Assemble a harness with [`fast_config`] and worker identity `"worker-1"`.
#[must_use]
pub fn harness() -> Harness {
    harness_with_worker("worker-1")
}

/// Assemble a harness with a caller-chosen worker identity, for scenarios
/// that simulate a second worker taking over an abandoned lease.
#[must_use]
pub fn harness_with_worker(worker_id: &str) -> Harness {
    let clock = Arc::new(test_clock());
    let store = Arc::new(InMemoryBookingStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
    let service_client = Arc::new(ScriptedServiceClient::new());
    let event_bus = Arc::new(InMemoryBookingEventBus::new());
    let reconciliation = Arc::new(InMemoryReconciliationSink::new());

    let engine = Arc::new(SagaEngine::new(
        Arc::clone(&store) as Arc<dyn BookingStore>,
        Arc::clone(&service_client) as Arc<dyn ServiceClient>,
        Arc::clone(&event_bus) as Arc<dyn BookingEventBus>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Some(Arc::clone(&reconciliation) as Arc<dyn ReconciliationSink>),
        fast_config(),
        worker_id,
    ));

    Harness { engine, store, service_client, event_bus, reconciliation, clock }
}

/// Build a second engine sharing `harness`'s store, service client, event
/// bus, reconciliation sink, and clock but driven by a different worker
/// identity. Used to simulate a crashed worker's booking being picked up by
/// its replacement.
#[must_use]
pub fn second_worker(h: &Harness, worker_id: &str) -> Arc<SagaEngine> {
    Arc::new(SagaEngine::new(
        Arc::clone(&h.store) as Arc<dyn BookingStore>,
        Arc::clone(&h.service_client) as Arc<dyn ServiceClient>,
        Arc::clone(&h.event_bus) as Arc<dyn BookingEventBus>,
        Arc::clone(&h.clock) as Arc<dyn Clock>,
        Some(Arc::clone(&h.reconciliation) as Arc<dyn ReconciliationSink>),
        fast_config(),
        worker_id,
    ))
}

/// A flight + hotel booking totalling 1000 USD, ready for `submit`.
#[must_use]
pub fn flight_and_hotel_booking() -> Booking {
    let components = Components {
        flight: Some(ComponentRequest { selection: serde_json::json!({"fare_id": "F1"}) }),
        hotel: Some(ComponentRequest { selection: serde_json::json!({"room_id": "H1"}) }),
        car: None,
    };
    let contact = Contact {
        email: "traveler@example.com".to_string(),
        phone: "+15551234567".to_string(),
        locale: "en-US".to_string(),
    };
    let travel = Travel {
        departure_date: NaiveDate::from_ymd_opt(2026, 8, 1).expect("valid date"),
        return_date: NaiveDate::from_ymd_opt(2026, 8, 8),
        departure_location: "JFK".to_string(),
        return_location: "JFK".to_string(),
        passengers: Passengers { adults: 2, children: 0, infants: 0 },
        rooms: 1,
    };
    let pricing = Pricing::new(900, 80, 20, 0, "USD").expect("valid pricing");

    Booking::new("BK-1001", "cust-42", contact, components, travel, pricing, Utc::now()).expect("valid booking")
}
