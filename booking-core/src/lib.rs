//! # Booking Core
//!
//! Types and contracts for the booking orchestration core: the aggregate a
//! saga advances (C5), its step plan (the `StepKind`/`CompensationKind`
//! tagged variants), and the trait boundaries the saga engine depends on —
//! `BookingStore` (C2), `BookingEventBus` (C3), and `ServiceClient` (C1).
//!
//! This crate has no knowledge of Postgres, Kafka, or HTTP; those live in
//! `booking-postgres`, `booking-eventbus`, and `booking-runtime` respectively,
//! each implementing a trait defined here. `booking-testing` provides
//! in-memory fakes of the same traits for deterministic tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod booking;
pub mod clock;
pub mod error;
pub mod event_bus;
pub mod ids;
pub mod ledger;
pub mod plan;
pub mod reconciliation;
pub mod service_client;
pub mod store;

pub use audit::{Actor, AuditEntry, AuditTrail};
pub use booking::{
    Booking, CompleteStepResult, Components, ComponentRequest, Contact, ModificationRequest,
    Passengers, Pricing, PricingDelta, RefundRequest, Status, SubServiceState, SubStatus, Travel,
};
pub use clock::{Clock, SystemClock};
pub use error::BookingError;
pub use event_bus::{BookingEvent, BookingEventBus, BookingEventKind, EventBusError};
pub use ids::{BookingId, TransactionId, Version};
pub use ledger::{CompensationOutcome, CompensationRecord, CompletedStep, FailedStep, Lease, Phase, SagaLedger};
pub use plan::{compensation_for, Component, CompensationKind, Plan, StepKind};
pub use reconciliation::{CompensationFailureReport, ReconciliationSink, ReconciliationSinkError};
pub use service_client::{ErrorClass, ServiceClient, ServiceError, ServiceRequest, ServiceResponse};
pub use store::{BookingStore, StoreError};
