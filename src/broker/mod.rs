pub mod consumer;
pub mod contracts;
pub mod producer;

pub use consumer::{build_consumer, decode};
pub use contracts::{
    InboundMessage, ModeratedMessage, ModerationVerdict, PersistedMessage, TopicPayload,
    VerdictConfidence, MESSAGE_SENT, TOPIC_INBOUND, TOPIC_MODERATED, TOPIC_PERSISTED,
};
pub use producer::{EventProducer, EventPublisher};
