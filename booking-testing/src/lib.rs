//! In-memory test doubles for every trait `booking-core` defines: a clock
//! that only moves when told to, a `BookingStore` and `BookingEventBus` that
//! keep everything in a `Mutex`, and a `ServiceClient` driven by a script.
//!
//! These let a saga test drive the engine through a full scenario —
//! including crash/resume and concurrent-worker races — without a database,
//! a broker, or a single real network call.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::unwrap_used)]

pub mod clock;
pub mod event_bus;
pub mod reconciliation;
pub mod service_client;
pub mod store;

pub use clock::{test_clock, FixedClock};
pub use event_bus::InMemoryBookingEventBus;
pub use reconciliation::InMemoryReconciliationSink;
pub use service_client::{ScriptedOutcome, ScriptedServiceClient};
pub use store::InMemoryBookingStore;
