//! Deterministic clock for saga tests: lease expiry, hold expiry, and
//! backoff scheduling all read `Clock::now()` rather than the wall clock, so
//! a test can park time wherever the scenario needs it.

use std::sync::Mutex;

use booking_core::clock::Clock;
use chrono::{DateTime, Utc};

/// A clock that only moves when a test tells it to.
#[derive(Debug)]
pub struct FixedClock {
    time: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Start the clock at `time`.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self { time: Mutex::new(time) }
    }

    /// Move the clock forward by `delta`, e.g. to cross a lease TTL.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.time.lock().unwrap();
        *guard += delta;
    }

    /// Jump the clock to an exact time.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.lock().unwrap() = time;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap()
    }
}

/// A fixed clock pinned to a fixed, memorable instant, for tests that don't
/// care what "now" is as long as it's stable.
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_does_not_move_on_its_own() {
        let clock = test_clock();
        let first = clock.now();
        let second = clock.now();
        assert_eq!(first, second);
    }

    #[test]
    fn advance_moves_time_forward() {
        let clock = test_clock();
        let before = clock.now();
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), before + chrono::Duration::seconds(30));
    }
}
