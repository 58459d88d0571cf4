use async_trait::async_trait;
use chrono::Utc;
use innkeep_core::notification::NotificationService;
use innkeep_shared::models::events::OwnerNotification;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const TOPIC_OWNER_NOTIFICATIONS: &str = "notifications.owner";
pub const TOPIC_BOOKING_PURCHASED: &str = "booking.purchased";
pub const TOPIC_BOOKINGS_EXPIRED: &str = "booking.expired";
pub const TOPIC_PAYOUTS_ISSUED: &str = "payout.issued";

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
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!("Sent message to {}/{}: partition {} offset {}", topic, key, delivery.partition, delivery.offset);
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }

    /// Serialize and publish, logging instead of failing. Events are advisory.
    pub async fn publish_json<T: Serialize>(&self, topic: &str, key: &str, event: &T) {
        match serde_json::to_string(event) {
            Ok(payload) => {
                let _ = self.publish(topic, key, &payload).await;
            }
            Err(e) => warn!(topic, "Could not serialize event: {}", e),
        }
    }
}

/// Owner notifications ride the event bus; a separate consumer fans them out.
#[derive(Clone)]
pub struct KafkaNotifier {
    producer: EventProducer,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl NotificationService for KafkaNotifier {
    async fn send(&self, user_ids: &[Uuid], content: &str, booking_id: Option<Uuid>) {
        let notification = OwnerNotification {
            recipients: user_ids.to_vec(),
            content: content.to_string(),
            booking_id,
            timestamp: Utc::now().timestamp(),
        };
        let key = booking_id.map(|id| id.to_string()).unwrap_or_default();
        self.producer
            .publish_json(TOPIC_OWNER_NOTIFICATIONS, &key, &notification)
            .await;
    }
}
