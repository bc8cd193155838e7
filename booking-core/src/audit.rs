//! Append-only audit trail. Every aggregate transition appends exactly one
//! entry here; nothing is ever mutated or removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who performed a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    /// The saga engine, acting on behalf of a worker.
    Engine {
        /// Worker identity, for correlating with lease ownership.
        worker_id: String,
    },
    /// A customer-initiated action (cancel, modify).
    Customer,
    /// An operator performing manual reconciliation.
    Operator {
        /// Operator identity.
        name: String,
    },
}

/// One append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique id of this entry.
    pub id: Uuid,
    /// Short name of the transition that produced this entry, e.g.
    /// `"complete_step"`, `"finalize"`.
    pub action: String,
    /// Free-form details, opaque to the trail itself.
    pub details: serde_json::Value,
    /// Who performed the transition.
    pub actor: Actor,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

/// The append-only sequence of audit entries for a booking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    /// An empty trail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry. This is the only way entries enter the trail.
    pub fn append(&mut self, action: impl Into<String>, details: serde_json::Value, actor: Actor, now: DateTime<Utc>) {
        self.entries.push(AuditEntry {
            id: Uuid::new_v4(),
            action: action.into(),
            details,
            actor,
            timestamp: now,
        });
    }

    /// All entries in the order they were appended.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Number of entries appended so far. Monotonically non-decreasing over
    /// the aggregate's lifetime.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no transitions have been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_trail_monotonically() {
        let mut trail = AuditTrail::new();
        assert_eq!(trail.len(), 0);
        trail.append("start_saga", serde_json::json!({}), Actor::Customer, Utc::now());
        assert_eq!(trail.len(), 1);
        trail.append("complete_step", serde_json::json!({"step": "hold_flight"}), Actor::Engine { worker_id: "w1".into() }, Utc::now());
        assert_eq!(trail.len(), 2);
    }
}
