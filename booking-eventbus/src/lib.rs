//! Redpanda/Kafka-backed implementation of the outbound event bus (C3).
//!
//! Publishes [`booking_core::event_bus::BookingEvent`] to a single topic,
//! keyed by `booking_id` so every event for a given booking lands on the
//! same partition and is therefore delivered in order. Delivery is
//! at-least-once: a publish that the caller observes as failed (timeout,
//! broker unavailable) must be retried from the outbox, and consumers are
//! expected to dedupe on `(booking_id, sequence)`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use booking_core::event_bus::{BookingEvent, BookingEventBus, EventBusError};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

/// Publishes booking events to a Kafka-compatible broker.
pub struct RedpandaBookingEventBus {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl RedpandaBookingEventBus {
    /// Connect with default producer settings (ack on leader, no compression).
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Unavailable`] if the producer cannot be created.
    pub fn new(brokers: &str, topic: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).topic(topic).build()
    }

    /// Start building a more specifically configured bus.
    #[must_use]
    pub fn builder() -> RedpandaBookingEventBusBuilder {
        RedpandaBookingEventBusBuilder::default()
    }
}

/// Builder for [`RedpandaBookingEventBus`].
#[derive(Default)]
pub struct RedpandaBookingEventBusBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaBookingEventBusBuilder {
    /// Set the broker addresses, comma-separated.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic events are published to.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` (default), or `"all"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"` (default), `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Per-publish send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the bus, creating the underlying Kafka producer.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Unavailable`] if `brokers`/`topic` weren't set
    /// or the producer could not be created.
    pub fn build(self) -> Result<RedpandaBookingEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::Unavailable("brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| EventBusError::Unavailable("topic not configured".to_string()))?;

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set("compression.type", self.compression.as_deref().unwrap_or("none"));

        let producer: FutureProducer = config
            .create()
            .map_err(|e| EventBusError::Unavailable(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            "booking event bus producer created"
        );

        Ok(RedpandaBookingEventBus {
            producer,
            topic,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

impl BookingEventBus for RedpandaBookingEventBus {
    fn publish(
        &self,
        event: BookingEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async move {
            let payload = bincode::serialize(&event)
                .map_err(|e| EventBusError::Serialization(e.to_string()))?;
            let key = event.booking_id.to_string();

            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        booking_id = %event.booking_id,
                        sequence = event.sequence,
                        partition,
                        offset,
                        "booking event published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        booking_id = %event.booking_id,
                        error = %kafka_error,
                        "failed to publish booking event"
                    );
                    Err(EventBusError::Unavailable(kafka_error.to_string()))
                }
            }
        })
    }
}
