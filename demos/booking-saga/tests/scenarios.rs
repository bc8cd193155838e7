//! End-to-end saga scenarios, each wired from scratch against a fresh
//! [`booking_saga_demo::Harness`]. Mirrors the seed scenarios the engine was
//! designed against: happy path, inventory rejection, payment rejection,
//! transient-then-success retry, crash/resume, and concurrent cancellation.

#![allow(clippy::unwrap_used)] // Test code can use unwrap

use std::time::Duration;

use booking_core::booking::{CompleteStepResult, ComponentRequest, ModificationRequest, Status};
use booking_core::event_bus::BookingEventKind;
use booking_core::ids::BookingId;
use booking_core::plan::{Component, Plan, StepKind};
use booking_core::service_client::{ErrorClass, ServiceError};
use booking_core::store::BookingStore;
use booking_saga_demo::{flight_and_hotel_booking, harness, harness_with_worker, second_worker};

fn transient(service: &str, action: &str) -> ServiceError {
    ServiceError {
        class: ErrorClass::Transient,
        service: service.to_string(),
        action: action.to_string(),
        message: "temporarily unavailable".to_string(),
        status_code: Some(503),
    }
}

fn permanent(service: &str, action: &str, message: &str) -> ServiceError {
    ServiceError {
        class: ErrorClass::Permanent,
        service: service.to_string(),
        action: action.to_string(),
        message: message.to_string(),
        status_code: Some(422),
    }
}

#[tokio::test]
async fn happy_path_confirms_a_flight_and_hotel_booking() {
    let h = harness();
    h.service_client.push_success("flight-inventory", "hold", serde_json::json!({"id": "hold-f1"}));
    h.service_client.push_success("hotel-inventory", "hold", serde_json::json!({"id": "hold-h1"}));
    h.service_client.push_success("payment", "authorize", serde_json::json!({"id": "auth-1"}));
    h.service_client
        .push_success("flight-inventory", "confirm", serde_json::json!({"confirmation_number": "FL1"}));
    h.service_client
        .push_success("hotel-inventory", "confirm", serde_json::json!({"confirmation_number": "HT1"}));
    h.service_client.push_success("payment", "capture", serde_json::json!({"id": "charge-1"}));
    h.service_client.push_success("notification", "send_confirmation", serde_json::json!({}));

    let booking_id = h.engine.submit(flight_and_hotel_booking()).await.unwrap();
    h.engine.drive(booking_id).await.unwrap();

    let booking = h.store.peek(booking_id).unwrap();
    assert_eq!(booking.status(), Status::Confirmed);
    assert_eq!(booking.component_state(Component::Flight).confirmation_number.as_deref(), Some("FL1"));
    assert_eq!(booking.component_state(Component::Hotel).confirmation_number.as_deref(), Some("HT1"));

    let confirmed = h
        .event_bus
        .events_for(booking_id)
        .into_iter()
        .filter(|e| matches!(e.kind, BookingEventKind::BookingConfirmed))
        .count();
    assert_eq!(confirmed, 1);
}

#[tokio::test]
async fn inventory_rejection_after_authorize_unwinds_in_reverse() {
    let h = harness();
    h.service_client.push_success("flight-inventory", "hold", serde_json::json!({"id": "hold-f1"}));
    h.service_client.push_success("hotel-inventory", "hold", serde_json::json!({"id": "hold-h1"}));
    h.service_client.push_success("payment", "authorize", serde_json::json!({"id": "auth-1"}));
    h.service_client
        .push_success("flight-inventory", "confirm", serde_json::json!({"confirmation_number": "FL1"}));
    h.service_client
        .push_failure("hotel-inventory", "confirm", permanent("hotel-inventory", "confirm", "room no longer available"));

    h.service_client.push_success("flight-inventory", "cancel_booking", serde_json::json!({}));
    h.service_client.push_success("payment", "void", serde_json::json!({}));
    h.service_client.push_success("hotel-inventory", "release_hold", serde_json::json!({}));
    h.service_client.push_success("flight-inventory", "release_hold", serde_json::json!({}));

    let booking_id = h.engine.submit(flight_and_hotel_booking()).await.unwrap();
    h.engine.drive(booking_id).await.unwrap();

    let booking = h.store.peek(booking_id).unwrap();
    assert_eq!(booking.status(), Status::Cancelled);

    let compensations: Vec<_> = booking.ledger().compensations().iter().map(|c| c.compensation.to_string()).collect();
    assert_eq!(
        compensations,
        vec![
            "cancel_booking_flight".to_string(),
            "void_authorization".to_string(),
            "release_hold_hotel".to_string(),
            "release_hold_flight".to_string(),
        ]
    );
    assert_eq!(h.service_client.call_count("payment", "refund"), 0);
}

#[tokio::test]
async fn payment_capture_refused_unwinds_every_confirmed_component() {
    let h = harness();
    h.service_client.push_success("flight-inventory", "hold", serde_json::json!({"id": "hold-f1"}));
    h.service_client.push_success("hotel-inventory", "hold", serde_json::json!({"id": "hold-h1"}));
    h.service_client.push_success("payment", "authorize", serde_json::json!({"id": "auth-1"}));
    h.service_client
        .push_success("flight-inventory", "confirm", serde_json::json!({"confirmation_number": "FL1"}));
    h.service_client
        .push_success("hotel-inventory", "confirm", serde_json::json!({"confirmation_number": "HT1"}));
    h.service_client
        .push_failure("payment", "capture", permanent("payment", "capture", "card declined"));

    h.service_client.push_success("hotel-inventory", "cancel_booking", serde_json::json!({}));
    h.service_client.push_success("flight-inventory", "cancel_booking", serde_json::json!({}));
    h.service_client.push_success("payment", "void", serde_json::json!({}));
    h.service_client.push_success("hotel-inventory", "release_hold", serde_json::json!({}));
    h.service_client.push_success("flight-inventory", "release_hold", serde_json::json!({}));

    let booking_id = h.engine.submit(flight_and_hotel_booking()).await.unwrap();
    h.engine.drive(booking_id).await.unwrap();

    let booking = h.store.peek(booking_id).unwrap();
    assert_eq!(booking.status(), Status::Cancelled);
    assert_eq!(h.service_client.call_count("notification", "send_confirmation"), 0);

    let compensations: Vec<_> = booking.ledger().compensations().iter().map(|c| c.compensation.to_string()).collect();
    assert_eq!(
        compensations,
        vec![
            "cancel_booking_hotel".to_string(),
            "cancel_booking_flight".to_string(),
            "void_authorization".to_string(),
            "release_hold_hotel".to_string(),
            "release_hold_flight".to_string(),
        ]
    );
}

#[tokio::test]
async fn transient_failures_retry_with_an_identical_idempotency_key() {
    let h = harness();
    h.service_client.push_success("flight-inventory", "hold", serde_json::json!({"id": "hold-f1"}));
    h.service_client.push_failure("hotel-inventory", "hold", transient("hotel-inventory", "hold"));
    h.service_client.push_failure("hotel-inventory", "hold", transient("hotel-inventory", "hold"));
    h.service_client.push_success("hotel-inventory", "hold", serde_json::json!({"id": "hold-h1"}));
    h.service_client.push_success("payment", "authorize", serde_json::json!({"id": "auth-1"}));
    h.service_client
        .push_success("flight-inventory", "confirm", serde_json::json!({"confirmation_number": "FL1"}));
    h.service_client
        .push_success("hotel-inventory", "confirm", serde_json::json!({"confirmation_number": "HT1"}));
    h.service_client.push_success("payment", "capture", serde_json::json!({"id": "charge-1"}));
    h.service_client.push_success("notification", "send_confirmation", serde_json::json!({}));

    let booking_id = h.engine.submit(flight_and_hotel_booking()).await.unwrap();
    h.engine.drive(booking_id).await.unwrap();

    assert_eq!(h.store.peek(booking_id).unwrap().status(), Status::Confirmed);
    assert_eq!(h.service_client.call_count("hotel-inventory", "hold"), 3);

    let keys: Vec<&str> = h
        .service_client
        .calls()
        .iter()
        .filter(|r| r.service == "hotel-inventory" && r.action == "hold")
        .map(|r| r.idempotency_key.as_str())
        .collect();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| *k == keys[0]));

    let step_completed = h
        .event_bus
        .events_for(booking_id)
        .into_iter()
        .filter(|e| matches!(e.kind, BookingEventKind::StepCompleted { step } if step == StepKind::Hold(Component::Hotel)))
        .count();
    assert_eq!(step_completed, 1);
}

/// Hand-build a booking that has already progressed through `confirm_flight`,
/// as if an earlier worker drove it that far before dying, and persist it.
async fn seed_booking_through_confirm_flight(h: &booking_saga_demo::Harness) -> BookingId {
    let mut booking = flight_and_hotel_booking();
    let plan = Plan::derive(&booking.components().included());
    let now = h.clock.now();
    booking.start_saga(plan, "worker-dead", now).unwrap();

    let steps_so_far = [
        (StepKind::Hold(Component::Flight), "hold-f1"),
        (StepKind::Hold(Component::Hotel), "hold-h1"),
    ];
    for (step, downstream_id) in steps_so_far {
        booking
            .complete_step(
                step,
                CompleteStepResult {
                    downstream_id: Some(downstream_id.to_string()),
                    confirmation_number: None,
                    payload: serde_json::json!({}),
                },
                "worker-dead",
                now,
            )
            .unwrap();
    }
    booking
        .complete_step(
            StepKind::Authorize,
            CompleteStepResult { downstream_id: Some("auth-1".to_string()), confirmation_number: None, payload: serde_json::json!({}) },
            "worker-dead",
            now,
        )
        .unwrap();
    booking
        .complete_step(
            StepKind::Confirm(Component::Flight),
            CompleteStepResult { downstream_id: None, confirmation_number: Some("FL1".to_string()), payload: serde_json::json!({}) },
            "worker-dead",
            now,
        )
        .unwrap();

    let booking_id = booking.booking_id();
    h.store.persist(&booking, booking_core::ids::Version::INITIAL).await.unwrap();
    booking_id
}

#[tokio::test]
async fn a_worker_crash_mid_capture_is_resumed_exactly_once_by_its_replacement() {
    let h = harness_with_worker("worker-dead");

    let mut booking = flight_and_hotel_booking();
    let plan = Plan::derive(&booking.components().included());
    let now = h.clock.now();
    booking.start_saga(plan, "worker-dead", now).unwrap();
    for (step, downstream_id, confirmation_number) in [
        (StepKind::Hold(Component::Flight), Some("hold-f1"), None),
        (StepKind::Hold(Component::Hotel), Some("hold-h1"), None),
        (StepKind::Authorize, Some("auth-1"), None),
        (StepKind::Confirm(Component::Flight), None, Some("FL1")),
        (StepKind::Confirm(Component::Hotel), None, Some("HT1")),
    ] {
        booking
            .complete_step(
                step,
                CompleteStepResult {
                    downstream_id: downstream_id.map(str::to_string),
                    confirmation_number: confirmation_number.map(str::to_string),
                    payload: serde_json::json!({}),
                },
                "worker-dead",
                now,
            )
            .unwrap();
    }
    let booking_id = booking.booking_id();
    h.store.persist(&booking, booking_core::ids::Version::INITIAL).await.unwrap();

    // worker-dead grabs a short-lived lease, then never comes back; advancing
    // the shared clock past the TTL is what `scan_stranded` sees, no real sleep needed.
    h.store.acquire_lease(booking_id, "worker-dead", Duration::from_millis(1)).await.unwrap();
    h.clock.advance(chrono::Duration::milliseconds(20));

    h.service_client.push_success("payment", "capture", serde_json::json!({"id": "charge-1"}));
    h.service_client.push_success("notification", "send_confirmation", serde_json::json!({}));

    let replacement = second_worker(&h, "worker-2");
    replacement.drive(booking_id).await.unwrap();

    assert_eq!(h.store.peek(booking_id).unwrap().status(), Status::Confirmed);
    assert_eq!(h.service_client.call_count("payment", "capture"), 1);
}

#[tokio::test]
async fn a_saga_past_its_booking_level_deadline_is_force_compensated() {
    let h = harness();

    let booking_id = h.engine.submit(flight_and_hotel_booking()).await.unwrap();
    let created_at = h.store.peek(booking_id).unwrap().created_at();
    h.clock.set(created_at + chrono::Duration::hours(25));

    h.engine.drive(booking_id).await.unwrap();

    let booking = h.store.peek(booking_id).unwrap();
    assert_eq!(booking.status(), Status::Cancelled);
    // The deadline trips before the first step is ever attempted.
    assert_eq!(h.service_client.call_count("flight-inventory", "hold"), 0);
}

#[tokio::test]
async fn a_failed_compensation_is_flagged_for_operator_reconciliation() {
    let h = harness();
    h.service_client.push_success("flight-inventory", "hold", serde_json::json!({"id": "hold-f1"}));
    h.service_client.push_success("hotel-inventory", "hold", serde_json::json!({"id": "hold-h1"}));
    h.service_client.push_success("payment", "authorize", serde_json::json!({"id": "auth-1"}));
    h.service_client
        .push_success("flight-inventory", "confirm", serde_json::json!({"confirmation_number": "FL1"}));
    h.service_client
        .push_failure("hotel-inventory", "confirm", permanent("hotel-inventory", "confirm", "room no longer available"));

    h.service_client.push_success("flight-inventory", "cancel_booking", serde_json::json!({}));
    h.service_client
        .push_failure("payment", "void", permanent("payment", "void", "gateway rejected the void"));
    h.service_client.push_success("hotel-inventory", "release_hold", serde_json::json!({}));
    h.service_client.push_success("flight-inventory", "release_hold", serde_json::json!({}));

    let booking_id = h.engine.submit(flight_and_hotel_booking()).await.unwrap();
    h.engine.drive(booking_id).await.unwrap();

    let booking = h.store.peek(booking_id).unwrap();
    assert_eq!(booking.status(), Status::Failed);

    let reports = h.reconciliation.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].booking_id, booking_id);
    assert_eq!(reports[0].compensation.to_string(), "void_authorization");

    // The rest of the walk still ran despite the one unresolved step.
    assert_eq!(h.service_client.call_count("hotel-inventory", "release_hold"), 1);
    assert_eq!(h.service_client.call_count("flight-inventory", "release_hold"), 1);
}

#[tokio::test]
async fn a_cancellation_requested_mid_flight_still_lets_the_in_progress_step_finish() {
    let h = harness();
    let booking_id = seed_booking_through_confirm_flight(&h).await;

    h.engine.request_cancellation(booking_id, "customer changed plans").await.unwrap();

    h.service_client
        .push_success("hotel-inventory", "confirm", serde_json::json!({"confirmation_number": "HT1"}));
    h.service_client.push_success("hotel-inventory", "cancel_booking", serde_json::json!({}));
    h.service_client.push_success("flight-inventory", "cancel_booking", serde_json::json!({}));
    h.service_client.push_success("payment", "void", serde_json::json!({}));
    h.service_client.push_success("hotel-inventory", "release_hold", serde_json::json!({}));
    h.service_client.push_success("flight-inventory", "release_hold", serde_json::json!({}));

    h.engine.drive(booking_id).await.unwrap();

    let booking = h.store.peek(booking_id).unwrap();
    assert_eq!(booking.status(), Status::Cancelled);
    // confirm_hotel ran to completion despite the pending cancellation.
    assert_eq!(h.service_client.call_count("hotel-inventory", "confirm"), 1);
    // capture must never have been reached.
    assert_eq!(h.service_client.call_count("payment", "capture"), 0);
    assert_eq!(h.service_client.call_count("payment", "refund"), 0);

    for (service, action) in [
        ("hotel-inventory", "cancel_booking"),
        ("flight-inventory", "cancel_booking"),
        ("payment", "void"),
        ("hotel-inventory", "release_hold"),
        ("flight-inventory", "release_hold"),
    ] {
        assert_eq!(h.service_client.call_count(service, action), 1, "{service}.{action} should run exactly once");
    }
}

#[tokio::test]
async fn a_confirmed_bookings_changed_room_selection_runs_as_a_delta_saga() {
    let h = harness();
    h.service_client.push_success("flight-inventory", "hold", serde_json::json!({"id": "hold-f1"}));
    h.service_client.push_success("hotel-inventory", "hold", serde_json::json!({"id": "hold-h1"}));
    h.service_client.push_success("payment", "authorize", serde_json::json!({"id": "auth-1"}));
    h.service_client
        .push_success("flight-inventory", "confirm", serde_json::json!({"confirmation_number": "FL1"}));
    h.service_client
        .push_success("hotel-inventory", "confirm", serde_json::json!({"confirmation_number": "HT1"}));
    h.service_client.push_success("payment", "capture", serde_json::json!({"id": "charge-1"}));
    h.service_client.push_success("notification", "send_confirmation", serde_json::json!({}));

    let booking_id = h.engine.submit(flight_and_hotel_booking()).await.unwrap();
    h.engine.drive(booking_id).await.unwrap();
    let transaction_id_before = h.store.peek(booking_id).unwrap().ledger().transaction_id();

    let mut new_components = h.store.peek(booking_id).unwrap().components().clone();
    new_components.hotel = Some(ComponentRequest { selection: serde_json::json!({"room_id": "H2"}) });
    h.service_client.push_success("hotel-inventory", "hold", serde_json::json!({"id": "hold-h2"}));
    h.service_client
        .push_success("hotel-inventory", "confirm", serde_json::json!({"confirmation_number": "HT2"}));

    h.engine
        .plan_modification(booking_id, ModificationRequest { components: new_components })
        .await
        .unwrap();
    assert_eq!(h.store.peek(booking_id).unwrap().status(), Status::Pending);

    h.engine.drive(booking_id).await.unwrap();

    let booking = h.store.peek(booking_id).unwrap();
    assert_eq!(booking.status(), Status::Confirmed);
    assert_eq!(booking.component_state(Component::Hotel).confirmation_number.as_deref(), Some("HT2"));
    assert_eq!(booking.ledger().transaction_id(), transaction_id_before);
    assert_eq!(h.service_client.call_count("hotel-inventory", "hold"), 2);
    assert_eq!(h.service_client.call_count("flight-inventory", "hold"), 1);

    let modification_started = h
        .event_bus
        .events_for(booking_id)
        .into_iter()
        .filter(|e| matches!(e.kind, BookingEventKind::ModificationStarted))
        .count();
    assert_eq!(modification_started, 1);
}
