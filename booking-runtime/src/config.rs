//! Typed runtime configuration, loaded from environment variables with
//! built-in defaults matching the contracts in `booking-core`.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;

/// Configuration for one `SagaEngine`/`HttpServiceClient` deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookingRuntimeConfig {
    /// Per-call deadline for outbound downstream calls.
    #[serde(with = "humantime_secs")]
    pub call_deadline: Duration,
    /// Base delay before the first retry.
    #[serde(with = "humantime_secs")]
    pub retry_base_delay: Duration,
    /// Exponential backoff factor.
    pub retry_factor: f64,
    /// Cap on computed retry delay.
    #[serde(with = "humantime_secs")]
    pub retry_max_delay: Duration,
    /// Max retries within one `invoke` call.
    pub max_retries: usize,
    /// Consecutive failures before a downstream's circuit opens.
    pub circuit_failure_threshold: usize,
    /// How long a circuit stays open before testing recovery.
    #[serde(with = "humantime_secs")]
    pub circuit_timeout: Duration,
    /// Successes required in half-open before closing.
    pub circuit_success_threshold: usize,
    /// Lease TTL granted by `acquire_lease`.
    #[serde(with = "humantime_secs")]
    pub lease_ttl: Duration,
    /// Total wall-clock budget for one saga before it is force-compensated.
    #[serde(with = "humantime_secs")]
    pub booking_deadline: Duration,
    /// How often the recovery loop scans for stranded sagas.
    #[serde(with = "humantime_secs")]
    pub recovery_scan_interval: Duration,
    /// How often the outbox-drain loop retries bookings with undelivered
    /// events.
    #[serde(with = "humantime_secs")]
    pub outbox_drain_interval: Duration,
    /// Bind address for the Prometheus metrics server.
    pub metrics_addr: SocketAddr,
}

impl Default for BookingRuntimeConfig {
    fn default() -> Self {
        Self {
            call_deadline: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
            retry_factor: 2.0,
            retry_max_delay: Duration::from_secs(5),
            max_retries: 3,
            circuit_failure_threshold: 5,
            circuit_timeout: Duration::from_secs(60),
            circuit_success_threshold: 2,
            lease_ttl: Duration::from_secs(30),
            booking_deadline: Duration::from_secs(24 * 60 * 60),
            recovery_scan_interval: Duration::from_secs(15),
            outbox_drain_interval: Duration::from_secs(5),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl BookingRuntimeConfig {
    /// Load configuration from `BOOKING_*`-prefixed environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a set environment variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("BOOKING_MAX_RETRIES") {
            config.max_retries = v.parse().map_err(|_| ConfigError::Invalid("BOOKING_MAX_RETRIES"))?;
        }
        if let Ok(v) = std::env::var("BOOKING_CALL_DEADLINE_SECS") {
            let secs: u64 = v.parse().map_err(|_| ConfigError::Invalid("BOOKING_CALL_DEADLINE_SECS"))?;
            config.call_deadline = Duration::from_secs(secs);
        }
        if let Ok(v) = std::env::var("BOOKING_METRICS_ADDR") {
            config.metrics_addr = v.parse().map_err(|_| ConfigError::Invalid("BOOKING_METRICS_ADDR"))?;
        }
        Ok(config)
    }

    /// Derive a [`RetryPolicy`] from this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .base_delay(self.retry_base_delay)
            .factor(self.retry_factor)
            .max_delay(self.retry_max_delay)
            .build()
    }

    /// Derive a [`CircuitBreakerConfig`] from this configuration.
    #[must_use]
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_threshold(self.circuit_failure_threshold)
            .timeout(self.circuit_timeout)
            .success_threshold(self.circuit_success_threshold)
            .build()
    }
}

/// Errors loading runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set but failed to parse.
    #[error("invalid value for {0}")]
    Invalid(&'static str),
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_client_contract() {
        let config = BookingRuntimeConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.call_deadline, Duration::from_secs(30));
        assert_eq!(config.booking_deadline, Duration::from_secs(24 * 60 * 60));
    }
}
