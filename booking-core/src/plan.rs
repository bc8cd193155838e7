//! The saga plan: a tagged variant rather than a dynamic handler map.
//!
//! `StepKind` enumerates every forward step the engine can ever dispatch;
//! `compensation_for` is a pure function from a completed step to its inverse.
//! No type introspection or handler registry is involved — `booking-runtime`'s
//! engine matches on these variants directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which inventory component a step (or its compensation) targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    /// Flight inventory.
    Flight,
    /// Lodging inventory.
    Hotel,
    /// Vehicle inventory.
    Car,
}

impl Component {
    /// The logical downstream service name this component maps to.
    #[must_use]
    pub const fn service_name(self) -> &'static str {
        match self {
            Self::Flight => "flight-inventory",
            Self::Hotel => "hotel-inventory",
            Self::Car => "car-inventory",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flight => write!(f, "flight"),
            Self::Hotel => write!(f, "hotel"),
            Self::Car => write!(f, "car"),
        }
    }
}

/// One forward step in a saga plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Reserve inventory at the downstream without committing.
    Hold(Component),
    /// Authorize (not capture) the full pricing total.
    Authorize,
    /// Convert a hold token into a confirmed downstream booking.
    Confirm(Component),
    /// Convert the authorization into a settled charge.
    Capture,
    /// Dispatch the confirmation to customer channels.
    Notify,
}

impl StepKind {
    /// Logical service this step is dispatched against.
    #[must_use]
    pub const fn service_name(self) -> &'static str {
        match self {
            Self::Hold(c) | Self::Confirm(c) => c.service_name(),
            Self::Authorize | Self::Capture => "payment",
            Self::Notify => "notification",
        }
    }

    /// Action name dispatched on `service_name()`.
    #[must_use]
    pub const fn action_name(self) -> &'static str {
        match self {
            Self::Hold(_) => "hold",
            Self::Confirm(_) => "confirm",
            Self::Authorize => "authorize",
            Self::Capture => "capture",
            Self::Notify => "send_confirmation",
        }
    }

    /// A stable, human-readable name used in ledger entries and audit
    /// trails, e.g. `"hold_flight"`, `"confirm_hotel"`, `"capture"`.
    #[must_use]
    pub fn step_name(self) -> String {
        match self {
            Self::Hold(c) => format!("hold_{c}"),
            Self::Confirm(c) => format!("confirm_{c}"),
            Self::Authorize => "authorize".to_string(),
            Self::Capture => "capture".to_string(),
            Self::Notify => "notify".to_string(),
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.step_name())
    }
}

/// The inverse of a previously-completed step, executed during the
/// compensation walk in reverse completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationKind {
    /// Release a hold. Safe to call on an already-expired hold.
    ReleaseHold(Component),
    /// Void a payment authorization. Must precede any confirm rollback that
    /// implies a refund.
    VoidAuthorization,
    /// Cancel a just-created downstream booking.
    CancelBooking(Component),
    /// Refund a captured payment. Always the full amount in saga rollback.
    Refund,
}

impl CompensationKind {
    /// Logical service this compensation is dispatched against.
    #[must_use]
    pub const fn service_name(self) -> &'static str {
        match self {
            Self::ReleaseHold(c) | Self::CancelBooking(c) => c.service_name(),
            Self::VoidAuthorization | Self::Refund => "payment",
        }
    }

    /// Action name dispatched on `service_name()`.
    #[must_use]
    pub const fn action_name(self) -> &'static str {
        match self {
            Self::ReleaseHold(_) => "release_hold",
            Self::CancelBooking(_) => "cancel_booking",
            Self::VoidAuthorization => "void",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for CompensationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReleaseHold(c) => write!(f, "release_hold_{c}"),
            Self::CancelBooking(c) => write!(f, "cancel_booking_{c}"),
            Self::VoidAuthorization => write!(f, "void_authorization"),
            Self::Refund => write!(f, "refund"),
        }
    }
}

/// The inverse of `step`, or `None` if `step` is non-compensable (its failure
/// is logged but does not roll back the saga).
///
/// `Notify` is the only non-compensable step: it is best-effort, and spec
/// silence on its compensability is resolved here in favor of "not rolled
/// back" per the design notes.
#[must_use]
pub const fn compensation_for(step: StepKind) -> Option<CompensationKind> {
    match step {
        StepKind::Hold(c) => Some(CompensationKind::ReleaseHold(c)),
        StepKind::Authorize => Some(CompensationKind::VoidAuthorization),
        StepKind::Confirm(c) => Some(CompensationKind::CancelBooking(c)),
        StepKind::Capture => Some(CompensationKind::Refund),
        StepKind::Notify => None,
    }
}

/// An ordered, deterministically-derived sequence of forward steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Plan {
    steps: Vec<StepKind>,
}

impl Plan {
    /// Derive the canonical plan for a set of included inventory components:
    /// hold each component, authorize payment, confirm each component, capture
    /// payment, notify. See the step plan derivation rationale: hold-before-
    /// authorize avoids tying up funds on inventory-driven rejections;
    /// authorize-before-confirm ensures inventory is only committed when
    /// funds are reserved; capture-last minimizes refund probability.
    #[must_use]
    pub fn derive(components: &[Component]) -> Self {
        let mut steps = Vec::with_capacity(components.len() * 2 + 3);
        for &c in components {
            steps.push(StepKind::Hold(c));
        }
        steps.push(StepKind::Authorize);
        for &c in components {
            steps.push(StepKind::Confirm(c));
        }
        steps.push(StepKind::Capture);
        steps.push(StepKind::Notify);
        Self { steps }
    }

    /// Build a plan from explicit steps, e.g. a narrower delta-saga plan for
    /// `ModifyBooking`.
    #[must_use]
    pub const fn from_steps(steps: Vec<StepKind>) -> Self {
        Self { steps }
    }

    /// The plan's steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[StepKind] {
        &self.steps
    }

    /// Number of steps in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step at `cursor`, if any.
    #[must_use]
    pub fn get(&self, cursor: usize) -> Option<StepKind> {
        self.steps.get(cursor).copied()
    }

    /// Append steps after the current end of the plan, e.g. a modification
    /// delta-saga extending an already-completed plan.
    pub(crate) fn extend(&mut self, additional: Vec<StepKind>) {
        self.steps.extend(additional);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_orders_holds_before_authorize_before_confirms_before_capture_before_notify() {
        let plan = Plan::derive(&[Component::Flight, Component::Hotel]);
        assert_eq!(plan.len(), 7);
        assert_eq!(
            plan.steps(),
            &[
                StepKind::Hold(Component::Flight),
                StepKind::Hold(Component::Hotel),
                StepKind::Authorize,
                StepKind::Confirm(Component::Flight),
                StepKind::Confirm(Component::Hotel),
                StepKind::Capture,
                StepKind::Notify,
            ]
        );
    }

    #[test]
    fn single_component_still_traverses_authorize_capture_notify() {
        let plan = Plan::derive(&[Component::Car]);
        assert_eq!(plan.len(), 4);
        assert!(plan.steps().contains(&StepKind::Authorize));
        assert!(plan.steps().contains(&StepKind::Capture));
        assert!(plan.steps().contains(&StepKind::Notify));
    }

    #[test]
    fn notify_has_no_compensation() {
        assert_eq!(compensation_for(StepKind::Notify), None);
    }

    #[test]
    fn every_other_step_has_a_compensation() {
        for step in Plan::derive(&[Component::Flight, Component::Hotel, Component::Car]).steps() {
            if *step != StepKind::Notify {
                assert!(compensation_for(*step).is_some());
            }
        }
    }

    #[test]
    fn capture_compensates_to_full_refund() {
        assert_eq!(compensation_for(StepKind::Capture), Some(CompensationKind::Refund));
    }
}
