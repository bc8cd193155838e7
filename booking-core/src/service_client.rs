//! Contract for the uniform outbound call primitive (Service Client, C1).
//!
//! `booking-core` defines only the trait and the wire-level types; the retrying,
//! circuit-breaking, HTTP-backed implementation lives in `booking-runtime`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// How a call outcome should be treated by the saga engine's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network error, timeout, 5xx, or 429 — eligible for retry.
    Transient,
    /// 4xx other than 408/429 — not retried; surfaced as a step failure.
    Permanent,
    /// Response missing or ambiguous — retried with the idempotency key
    /// preserved so a lost reply doesn't duplicate the downstream effect.
    Unknown,
}

/// A classified failure from a downstream invocation. The service client never
/// throws for a classified error; it always returns one the engine can reason
/// about.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{class:?} error calling {service}.{action}: {message}")]
pub struct ServiceError {
    /// Retry/compensation classification.
    pub class: ErrorClass,
    /// Logical service name the call targeted.
    pub service: String,
    /// Action name the call targeted.
    pub action: String,
    /// Downstream-supplied or synthesized explanation.
    pub message: String,
    /// HTTP status code, when one was received.
    pub status_code: Option<u16>,
}

/// One outbound call: a logical service/action pair, a payload, and the
/// idempotency key the downstream will deduplicate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Logical downstream service name, e.g. `"flight-inventory"`.
    pub service: String,
    /// Action name, e.g. `"hold"`, `"confirm"`, `"authorize"`.
    pub action: String,
    /// Serializable request payload.
    pub payload: Value,
    /// Idempotency key, stable per `{booking_id, step_name, attempt_group}`.
    pub idempotency_key: String,
}

/// A successful downstream response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Raw response body.
    pub body: Value,
}

/// Uniform outbound call primitive to any downstream: timeout, retry-with-
/// backoff, idempotency key, and failure classification are all contained in
/// the implementation; callers see only a classified result.
pub trait ServiceClient: Send + Sync {
    /// Invoke a downstream action. Never returns `Err` for a reachable-but-
    /// rejecting downstream — rejections come back as `Ok` with a classified
    /// error embedded by the caller's interpretation of the response, or as
    /// `Err(ServiceError)` only for classified transport-level failures.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` when the call could not be completed or was
    /// rejected by the downstream; the error's `class` tells the caller
    /// whether to retry.
    fn invoke(
        &self,
        request: ServiceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ServiceResponse, ServiceError>> + Send + '_>>;

    /// Per-call deadline applied by this client's implementation.
    fn call_deadline(&self) -> Duration {
        Duration::from_secs(30)
    }
}
