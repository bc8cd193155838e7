//! HTTP-backed `ServiceClient` (C1): one uniform outbound call primitive to
//! any downstream, with per-call deadline, exponential backoff with jitter,
//! a circuit breaker per downstream service, and idempotency-key forwarding
//! on every retry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use booking_core::service_client::{ErrorClass, ServiceClient, ServiceError, ServiceRequest, ServiceResponse};
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::metrics::ServiceClientMetrics;
use crate::retry::RetryPolicy;

/// Maps a logical service name to its base URL, e.g.
/// `"flight-inventory" -> "https://flight-inventory.internal"`.
pub type ServiceRegistry = HashMap<String, String>;

/// Production `ServiceClient` implementation: `reqwest` over HTTP, one
/// circuit breaker per downstream service, shared retry policy.
pub struct HttpServiceClient {
    client: Client,
    registry: ServiceRegistry,
    retry_policy: RetryPolicy,
    call_deadline: Duration,
    breaker_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl HttpServiceClient {
    /// Build a client with the given downstream registry and defaults from
    /// `RetryPolicy::default()`/`CircuitBreakerConfig::default()`.
    #[must_use]
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            client: Client::new(),
            registry,
            retry_policy: RetryPolicy::default(),
            call_deadline: Duration::from_secs(30),
            breaker_config: CircuitBreakerConfig::default(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the circuit breaker configuration applied per downstream.
    #[must_use]
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Override the per-call deadline.
    #[must_use]
    pub const fn with_call_deadline(mut self, deadline: Duration) -> Self {
        self.call_deadline = deadline;
        self
    }

    async fn breaker_for(&self, service: &str) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().await.get(service) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(service.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_config.clone()))
            .clone()
    }

    fn classify(status: StatusCode) -> ErrorClass {
        if status.is_success() {
            // Callers only reach this path for non-2xx; kept exhaustive for clarity.
            ErrorClass::Unknown
        } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
            ErrorClass::Transient
        } else if status.is_server_error() {
            ErrorClass::Transient
        } else if status.is_client_error() {
            ErrorClass::Permanent
        } else {
            ErrorClass::Unknown
        }
    }

    async fn attempt_once(&self, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError> {
        let url = match self.registry.get(&request.service) {
            Some(base) => format!("{base}/{}", request.action),
            None => {
                return Err(ServiceError {
                    class: ErrorClass::Permanent,
                    service: request.service.clone(),
                    action: request.action.clone(),
                    message: format!("unknown downstream service {}", request.service),
                    status_code: None,
                });
            }
        };

        let sent = self
            .client
            .post(url)
            .timeout(self.call_deadline)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&request.payload)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                let class = if err.is_timeout() || err.is_connect() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Unknown
                };
                return Err(ServiceError {
                    class,
                    service: request.service.clone(),
                    action: request.action.clone(),
                    message: err.to_string(),
                    status_code: err.status().map(|s| s.as_u16()),
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.json::<serde_json::Value>().await {
                Ok(body) => Ok(ServiceResponse { body }),
                Err(err) => Err(ServiceError {
                    class: ErrorClass::Unknown,
                    service: request.service.clone(),
                    action: request.action.clone(),
                    message: format!("response body parse failure: {err}"),
                    status_code: Some(status.as_u16()),
                }),
            }
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ServiceError {
                class: Self::classify(status),
                service: request.service.clone(),
                action: request.action.clone(),
                message,
                status_code: Some(status.as_u16()),
            })
        }
    }
}

impl ServiceClient for HttpServiceClient {
    fn invoke(
        &self,
        request: ServiceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ServiceResponse, ServiceError>> + Send + '_>> {
        Box::pin(async move {
            crate::metrics::ensure_described();
            let breaker = self.breaker_for(&request.service).await;

            let mut last_error: Option<ServiceError> = None;
            for attempt in 0..=self.retry_policy.max_retries {
                let started = Instant::now();
                let outcome = breaker
                    .call(|| self.attempt_once(&request))
                    .await;
                ServiceClientMetrics::record_call(started.elapsed());

                match outcome {
                    Ok(response) => return Ok(response),
                    Err(CircuitBreakerError::Open) => {
                        let err = ServiceError {
                            class: ErrorClass::Transient,
                            service: request.service.clone(),
                            action: request.action.clone(),
                            message: "circuit open".to_string(),
                            status_code: None,
                        };
                        last_error = Some(err);
                    }
                    Err(CircuitBreakerError::Inner(err)) => {
                        ServiceClientMetrics::record_error();
                        let retryable = matches!(err.class, ErrorClass::Transient | ErrorClass::Unknown);
                        last_error = Some(err);
                        if !retryable {
                            break;
                        }
                    }
                }

                if attempt < self.retry_policy.max_retries {
                    tracing::warn!(
                        service = %request.service,
                        action = %request.action,
                        attempt,
                        "retrying downstream call"
                    );
                    ServiceClientMetrics::record_retry();
                    tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
                }
            }

            ServiceClientMetrics::record_retry_exhausted();
            Err(last_error.unwrap_or_else(|| ServiceError {
                class: ErrorClass::Unknown,
                service: request.service.clone(),
                action: request.action.clone(),
                message: "exhausted retries with no recorded error".to_string(),
                status_code: None,
            }))
        })
    }

    fn call_deadline(&self) -> Duration {
        self.call_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn classifies_rate_limit_as_transient() {
        assert_eq!(HttpServiceClient::classify(StatusCode::TOO_MANY_REQUESTS), ErrorClass::Transient);
    }

    #[test]
    fn classifies_not_found_as_permanent() {
        assert_eq!(HttpServiceClient::classify(StatusCode::NOT_FOUND), ErrorClass::Permanent);
    }

    #[test]
    fn classifies_server_error_as_transient() {
        assert_eq!(HttpServiceClient::classify(StatusCode::INTERNAL_SERVER_ERROR), ErrorClass::Transient);
    }

    #[test]
    fn classifies_request_timeout_as_transient() {
        assert_eq!(HttpServiceClient::classify(StatusCode::REQUEST_TIMEOUT), ErrorClass::Transient);
    }
}
