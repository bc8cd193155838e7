//! Exponential backoff with jitter for the service client's in-call retry
//! loop and for the saga engine's in-worker step retries.

use std::time::Duration;

use rand::Rng;

/// Backoff policy configuration.
///
/// # Default values (per the service client contract)
///
/// - `max_retries`: 3
/// - `base_delay`: 1s
/// - `factor`: 2.0
/// - `max_delay`: 5s cap
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts within one invocation.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub factor: f64,
    /// Cap on the computed delay, before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder, seeded with the defaults above.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Delay before retry attempt `attempt` (0-indexed), with jitter applied
    /// so concurrently-retrying workers don't thunder the downstream at the
    /// same instant.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let raw_ms = self.base_delay.as_millis() as f64 * self.factor.powi(attempt as i32);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_millis((capped_ms * jitter) as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set the maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Set the base delay before the first retry.
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    /// Set the exponential backoff factor.
    #[must_use]
    pub const fn factor(mut self, factor: f64) -> Self {
        self.policy.factor = factor;
        self
    }

    /// Set the cap on computed delay (applied before jitter).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Build the policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt_number_and_respects_cap() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .factor(2.0)
            .max_delay(Duration::from_secs(1))
            .build();

        for attempt in 0..6 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= Duration::from_secs(1));
        }
    }

    #[test]
    fn default_policy_matches_service_client_contract() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }
}
