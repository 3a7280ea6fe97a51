use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use tracing::warn;

use super::contracts::TopicPayload;
use crate::errors::BrokerError;

/// Build a stream consumer subscribed to a single topic. Replicas share the
/// group id so partitions divide the work; delivery is at-least-once and
/// handlers stay idempotent keyed by message id.
pub fn build_consumer(broker: &str, group: &str, topic: &str) -> Result<StreamConsumer, BrokerError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", broker)
        .set("group.id", group)
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;
    consumer.subscribe(&[topic])?;
    Ok(consumer)
}

/// Decode and validate a consumed payload. Malformed messages are logged and
/// skipped; the offset advances and nothing is re-queued.
pub fn decode<T: TopicPayload>(payload: Option<&[u8]>) -> Option<T> {
    let bytes = match payload {
        Some(bytes) => bytes,
        None => {
            warn!(topic = T::TOPIC, "skipping event with empty payload");
            return None;
        }
    };

    let parsed: T = match serde_json::from_slice(bytes) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(topic = T::TOPIC, "skipping undecodable event: {err}");
            return None;
        }
    };

    if let Err(reason) = parsed.validate() {
        warn!(topic = T::TOPIC, "skipping invalid event: {reason}");
        return None;
    }
    Some(parsed)
}
