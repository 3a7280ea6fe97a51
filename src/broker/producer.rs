use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::debug;

use super::contracts::{InboundMessage, ModeratedMessage, PersistedMessage, TopicPayload};
use crate::errors::BrokerError;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Object-safe produce surface for the three topics. The message service and
/// the pipeline depend on this, not on the Kafka client, so tests can swap in
/// a recording publisher.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_inbound(&self, payload: &InboundMessage) -> Result<(), BrokerError>;

    async fn publish_moderated(&self, payload: &ModeratedMessage) -> Result<(), BrokerError>;

    async fn publish_persisted(&self, payload: &PersistedMessage) -> Result<(), BrokerError>;
}

/// Typed producer over the three message topics. Every produce validates
/// the payload against its topic contract first and keys by message id.
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(broker: &str) -> Result<Self, BrokerError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", broker)
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self { producer })
    }

    pub async fn publish<T: TopicPayload>(&self, payload: &T) -> Result<(), BrokerError> {
        payload
            .validate()
            .map_err(|reason| BrokerError::Schema { topic: T::TOPIC, reason })?;

        let key = payload.key();
        let body = serde_json::to_string(payload)?;

        self.producer
            .send(
                FutureRecord::to(T::TOPIC).key(&key).payload(&body),
                SEND_TIMEOUT,
            )
            .await
            .map_err(|(err, _)| BrokerError::Kafka(err))?;

        debug!(topic = T::TOPIC, %key, "produced event");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for EventProducer {
    async fn publish_inbound(&self, payload: &InboundMessage) -> Result<(), BrokerError> {
        self.publish(payload).await
    }

    async fn publish_moderated(&self, payload: &ModeratedMessage) -> Result<(), BrokerError> {
        self.publish(payload).await
    }

    async fn publish_persisted(&self, payload: &PersistedMessage) -> Result<(), BrokerError> {
        self.publish(payload).await
    }
}
