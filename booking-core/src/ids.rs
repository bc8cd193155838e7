//! Strong identifier and version types for the booking aggregate.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a booking aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Generate a new random booking id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID, e.g. one loaded from storage.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a saga transaction (one per forward attempt; a delta-saga
/// on a confirmed booking gets its own `TransactionId` while reusing the
/// booking's ledger history).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new random transaction id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic version counter used for optimistic concurrency on `persist`.
///
/// Mirrors the event-sourcing `Version` newtype: starts at 0, increments by
/// one on every successful write, and a stale `expected_version` on `persist`
/// is rejected rather than silently overwritten.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a booking that has never been persisted.
    pub const INITIAL: Self = Self(0);

    /// Wrap a raw version value, e.g. one read back from the store.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw version value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version that results from one more successful persist.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_initial_is_zero() {
        assert_eq!(Version::INITIAL.value(), 0);
    }

    #[test]
    fn version_next_increments() {
        assert_eq!(Version::new(4).next(), Version::new(5));
    }

    #[test]
    fn booking_id_round_trips_through_uuid() {
        let id = BookingId::new();
        let again = BookingId::from_uuid(id.as_uuid());
        assert_eq!(id, again);
    }
}
