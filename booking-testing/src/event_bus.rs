//! In-memory `BookingEventBus` that records every published event for
//! assertions instead of forwarding it anywhere.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use booking_core::event_bus::{BookingEvent, BookingEventBus, EventBusError};

/// Captures published events in arrival order.
#[derive(Clone, Default)]
pub struct InMemoryBookingEventBus {
    events: Arc<Mutex<Vec<BookingEvent>>>,
}

impl InMemoryBookingEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<BookingEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events published for a single booking, in order.
    #[must_use]
    pub fn events_for(&self, booking_id: booking_core::ids::BookingId) -> Vec<BookingEvent> {
        self.events.lock().unwrap().iter().filter(|e| e.booking_id == booking_id).cloned().collect()
    }
}

impl BookingEventBus for InMemoryBookingEventBus {
    fn publish(
        &self,
        event: BookingEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        self.events.lock().unwrap().push(event);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::event_bus::BookingEventKind;
    use booking_core::ids::BookingId;
    use chrono::Utc;

    #[tokio::test]
    async fn publish_appends_in_order() {
        let bus = InMemoryBookingEventBus::new();
        let booking_id = BookingId::new();

        bus.publish(BookingEvent {
            booking_id,
            sequence: 1,
            occurred_at: Utc::now(),
            kind: BookingEventKind::BookingCreated,
        })
        .await
        .unwrap();
        bus.publish(BookingEvent {
            booking_id,
            sequence: 2,
            occurred_at: Utc::now(),
            kind: BookingEventKind::BookingConfirmed,
        })
        .await
        .unwrap();

        let events = bus.events_for(booking_id);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);
    }
}
