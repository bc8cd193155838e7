//! Scripted `ServiceClient` double: each `(service, action)` pair is given a
//! queue of canned outcomes, popped in order on every `invoke`. Every call is
//! recorded so a test can assert on idempotency keys, call counts, and the
//! exact order downstream services were hit in.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use booking_core::service_client::{ServiceClient, ServiceError, ServiceRequest, ServiceResponse};

/// A scripted outcome for one call.
pub type ScriptedOutcome = Result<ServiceResponse, ServiceError>;

/// `ServiceClient` double driven entirely by a pre-loaded script.
///
/// Calling past the end of a `(service, action)`'s queue panics — an
/// unscripted call is a test bug, not a condition to paper over.
#[derive(Default)]
pub struct ScriptedServiceClient {
    queues: Mutex<HashMap<(String, String), VecDeque<ScriptedOutcome>>>,
    calls: Mutex<Vec<ServiceRequest>>,
}

impl ScriptedServiceClient {
    /// Start with an empty script; load outcomes with [`Self::push`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome for `service`/`action`. Outcomes are popped in
    /// the order they were pushed.
    pub fn push(&self, service: &str, action: &str, outcome: ScriptedOutcome) {
        self.queues
            .lock()
            .unwrap()
            .entry((service.to_string(), action.to_string()))
            .or_default()
            .push_back(outcome);
    }

    /// Queue a success response carrying `body`.
    pub fn push_success(&self, service: &str, action: &str, body: serde_json::Value) {
        self.push(service, action, Ok(ServiceResponse { body }));
    }

    /// Queue a classified failure.
    pub fn push_failure(&self, service: &str, action: &str, error: ServiceError) {
        self.push(service, action, Err(error));
    }

    /// Every request seen so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made against `service`/`action`.
    #[must_use]
    pub fn call_count(&self, service: &str, action: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| r.service == service && r.action == action).count()
    }
}

impl ServiceClient for ScriptedServiceClient {
    fn invoke(
        &self,
        request: ServiceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ServiceResponse, ServiceError>> + Send + '_>> {
        self.calls.lock().unwrap().push(request.clone());

        let key = (request.service.clone(), request.action.clone());
        let outcome = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| panic!("no scripted outcome left for {}.{}", request.service, request.action));

        Box::pin(async move { outcome })
    }

    fn call_deadline(&self) -> Duration {
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::service_client::ErrorClass;

    #[tokio::test]
    async fn outcomes_are_popped_in_fifo_order() {
        let client = ScriptedServiceClient::new();
        client.push_success("flight-inventory", "hold", serde_json::json!({"hold_id": "h1"}));
        client.push_failure(
            "flight-inventory",
            "hold",
            ServiceError {
                class: ErrorClass::Transient,
                service: "flight-inventory".to_string(),
                action: "hold".to_string(),
                message: "timeout".to_string(),
                status_code: None,
            },
        );

        let request = ServiceRequest {
            service: "flight-inventory".to_string(),
            action: "hold".to_string(),
            payload: serde_json::json!({}),
            idempotency_key: "bk:hold_flight:0".to_string(),
        };

        let first = client.invoke(request.clone()).await;
        assert!(first.is_ok());
        let second = client.invoke(request).await;
        assert!(matches!(second, Err(ServiceError { class: ErrorClass::Transient, .. })));
        assert_eq!(client.call_count("flight-inventory", "hold"), 2);
    }

    #[tokio::test]
    #[should_panic(expected = "no scripted outcome left")]
    async fn an_unscripted_call_panics() {
        let client = ScriptedServiceClient::new();
        let request = ServiceRequest {
            service: "payment".to_string(),
            action: "authorize".to_string(),
            payload: serde_json::json!({}),
            idempotency_key: "bk:authorize:0".to_string(),
        };
        let _ = client.invoke(request).await;
    }
}
