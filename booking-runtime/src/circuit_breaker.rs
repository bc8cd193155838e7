//! Circuit breaker guarding each downstream service the service client calls,
//! preventing a struggling downstream from being hammered by every worker's
//! retry loop at once.
//!
//! - **Closed**: normal operation, failures are counted.
//! - **Open**: too many failures; calls are rejected immediately.
//! - **HalfOpen**: after `timeout`, a limited number of calls are let through
//!   to test recovery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: usize,
    /// How long to stay open before testing recovery.
    pub timeout: Duration,
    /// Successes required in `HalfOpen` before closing again.
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder { config: Self::default() }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the open-state timeout.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    /// Set the half-open success threshold.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        self.config
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Requests pass through normally.
    Closed,
    /// Requests are rejected immediately.
    Open,
    /// A limited number of requests are allowed to test recovery.
    HalfOpen,
}

/// Errors from a call made through a circuit breaker.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the call was rejected without being attempted.
    #[error("circuit breaker is open")]
    Open,
    /// The call was attempted and failed.
    #[error("operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: State,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
}

/// Per-downstream circuit breaker. Cheap to clone; internal state is shared.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<RwLock<Inner>>,
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker, starting `Closed`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(Inner {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current state.
    pub async fn state(&self) -> State {
        self.inner.read().await.state
    }

    /// Run `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` without attempting `operation` if
    /// the circuit is open. Returns `CircuitBreakerError::Inner` if
    /// `operation` itself fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if !self.can_attempt().await {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("circuit breaker open, rejecting call");
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(result) => {
                self.on_success().await;
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(err) => {
                self.on_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    async fn can_attempt(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => match inner.last_failure_time {
                Some(last_failure) if last_failure.elapsed() >= self.config.timeout => {
                    tracing::info!("circuit breaker OPEN -> HALF_OPEN");
                    inner.state = State::HalfOpen;
                    inner.success_count = 0;
                    true
                }
                _ => false,
            },
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            State::Closed => inner.failure_count = 0,
            State::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(successes = inner.success_count, "circuit breaker HALF_OPEN -> CLOSED");
                    inner.state = State::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_failure_time = None;
                }
            }
            State::Open => inner.failure_count = 0,
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "circuit breaker CLOSED -> OPEN"
                    );
                    inner.state = State::Open;
                }
            }
            State::HalfOpen => {
                tracing::warn!("circuit breaker HALF_OPEN -> OPEN, recovery attempt failed");
                inner.state = State::Open;
                inner.failure_count = 1;
                inner.success_count = 0;
            }
            State::Open => inner.failure_count += 1,
        }
    }

    /// Snapshot of call counters.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker back to `Closed`. For operator intervention.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.state = State::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
    }
}

/// Cumulative call counters for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Total calls attempted (including rejections).
    pub total_calls: u64,
    /// Calls that succeeded.
    pub total_successes: u64,
    /// Calls that failed.
    pub total_failures: u64,
    /// Calls rejected because the circuit was open.
    pub total_rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Fraction of attempted (non-rejected) calls that succeeded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_successes + self.total_failures;
        if attempted == 0 {
            0.0
        } else {
            self.total_successes as f64 / attempted as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::builder().failure_threshold(2).build(),
        );
        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn rejects_calls_while_open() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::builder().failure_threshold(1).build(),
        );
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        let result = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::builder()
                .failure_threshold(1)
                .timeout(Duration::from_millis(10))
                .success_threshold(1)
                .build(),
        );
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, State::Closed);
    }
}
