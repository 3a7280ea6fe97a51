pub mod analyzer;

pub use analyzer::AnalyzerClient;

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::consumer::StreamConsumer;
use rdkafka::Message as KafkaMessage;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::broker::{
    decode, EventPublisher, InboundMessage, ModeratedMessage, PersistedMessage,
};
use crate::database::Database;
use crate::errors::PipelineError;
use crate::models::{MessageView, ModerationMeta, RoomId};

/// Fan-out hook the pipeline drives after a verdict lands. The gateway
/// implements this; injecting it here keeps the gateway → message service →
/// pipeline dependency chain acyclic.
#[async_trait]
pub trait FanoutSink: Send + Sync {
    async fn emit_message_updated(&self, room_id: RoomId, message: MessageView);
}

/// The two asynchronous stages between submission and fan-out: `inbound`
/// events get an analyzer verdict and move to `moderated`; `moderated`
/// events are persisted, re-emitted as `persisted`, and fanned out.
///
/// Both handlers are idempotent keyed by message id, so at-least-once
/// delivery and redelivery after partial failure are safe.
pub struct PipelineProcessor {
    db: Database,
    producer: Arc<dyn EventPublisher>,
    analyzer: AnalyzerClient,
    fanout: Arc<dyn FanoutSink>,
}

impl PipelineProcessor {
    pub fn new(
        db: Database,
        producer: Arc<dyn EventPublisher>,
        analyzer: AnalyzerClient,
        fanout: Arc<dyn FanoutSink>,
    ) -> Self {
        Self {
            db,
            producer,
            analyzer,
            fanout,
        }
    }

    pub async fn handle_inbound(&self, inbound: InboundMessage) -> Result<(), PipelineError> {
        let moderation = self.analyzer.verdict(&inbound.body, inbound.id).await;
        let moderated = ModeratedMessage {
            inbound,
            moderation,
            processed_at: Utc::now(),
        };
        self.producer.publish_moderated(&moderated).await?;
        Ok(())
    }

    pub async fn handle_moderated(&self, moderated: ModeratedMessage) -> Result<(), PipelineError> {
        let meta = ModerationMeta {
            sentiment: moderated.moderation.sentiment,
            flagged: moderated.moderation.flagged,
            reasons: moderated.moderation.reasons.clone(),
        };

        let message = match self
            .db
            .update_message_moderation(moderated.inbound.id, &meta)
            .await?
        {
            Some(message) => message,
            None => {
                debug!(message_id = %moderated.inbound.id, "verdict for unknown message, skipping");
                return Ok(());
            }
        };

        let persisted = PersistedMessage {
            doc_id: message.id,
            created_at: message.created_at,
            updated_at: message.updated_at,
            moderated,
        };
        self.producer.publish_persisted(&persisted).await?;

        self.fanout
            .emit_message_updated(message.room_id, message.to_view())
            .await;
        Ok(())
    }

    /// Consume `messages.inbound` forever. Malformed events are skipped;
    /// handler errors are logged and the offset advances (the broker's
    /// redelivery covers transient failures on other replicas).
    pub async fn run_inbound(self: Arc<Self>, consumer: StreamConsumer) {
        loop {
            match consumer.recv().await {
                Ok(event) => {
                    if let Some(inbound) = decode::<InboundMessage>(event.payload()) {
                        let id = inbound.id;
                        if let Err(err) = self.handle_inbound(inbound).await {
                            error!(message_id = %id, "inbound stage failed: {err}");
                        }
                    }
                }
                Err(err) => warn!("inbound consume error: {err}"),
            }
        }
    }

    /// Consume `messages.moderated` forever.
    pub async fn run_moderated(self: Arc<Self>, consumer: StreamConsumer) {
        loop {
            match consumer.recv().await {
                Ok(event) => {
                    if let Some(moderated) = decode::<ModeratedMessage>(event.payload()) {
                        let id = moderated.inbound.id;
                        if let Err(err) = self.handle_moderated(moderated).await {
                            error!(message_id = %id, "moderated stage failed: {err}");
                        }
                    }
                }
                Err(err) => warn!("moderated consume error: {err}"),
            }
        }
    }
}
