//! `PostgreSQL` persistence for the booking orchestration core: the durable
//! `BookingStore` (C2) and the compensation-failure reconciliation queue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod reconciliation;
pub mod store;

pub use reconciliation::{CompensationFailure, CompensationReconciliationQueue, ReconciliationError, ReconciliationStatus};
pub use store::PostgresBookingStore;
