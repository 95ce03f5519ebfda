use altis_core::NotificationSink;
use altis_shared::BookingEvent;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(topic, key, partition = delivery.partition, offset = delivery.offset, "Event delivered");
                Ok(())
            }
            Err((e, _msg)) => {
                error!(topic, key, error = %e, "Failed to deliver event");
                Err(e)
            }
        }
    }
}

/// Publishes booking events as JSON, keyed by flight id so one flight's seat
/// changes stay ordered within a partition.
pub struct KafkaSink {
    producer: EventProducer,
    topic: String,
}

impl KafkaSink {
    pub fn new(brokers: &str, topic: impl Into<String>) -> Result<Self, rdkafka::error::KafkaError> {
        Ok(Self {
            producer: EventProducer::new(brokers)?,
            topic: topic.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for KafkaSink {
    async fn publish(&self, events: Vec<BookingEvent>) {
        for event in events {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "Failed to encode booking event");
                    continue;
                }
            };
            // Delivery failures are logged by the producer; notifications are best effort.
            let _ = self
                .producer
                .publish(&self.topic, &event.flight_id.to_string(), &payload)
                .await;
        }
    }
}
