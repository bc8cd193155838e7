//! # Booking Runtime
//!
//! The executable half of the booking orchestration core: the Saga Engine
//! (C4) that drives a `booking_core::Booking` through its plan, the HTTP
//! `ServiceClient` (C1) with retry/circuit-breaking, a worker pool and
//! crash-recovery loop, Prometheus metrics, and environment-driven
//! configuration.
//!
//! `booking-core` defines the shapes; this crate is the only place that
//! knows about `tokio`, `reqwest`, or wall-clock time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod http_client;
pub mod metrics;
pub mod retry;
pub mod worker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics, State};
pub use config::{BookingRuntimeConfig, ConfigError};
pub use engine::{EngineError, SagaEngine};
pub use http_client::{HttpServiceClient, ServiceRegistry};
pub use metrics::{MetricsError, MetricsServer, TerminalOutcome};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use worker::{run_hold_expiry_loop, run_outbox_drain_loop, run_recovery_loop, WorkerPool};
