use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{MessageId, RoomId, Sentiment, UserId};

pub const TOPIC_INBOUND: &str = "messages.inbound";
pub const TOPIC_MODERATED: &str = "messages.moderated";
pub const TOPIC_PERSISTED: &str = "messages.persisted";

pub const MESSAGE_SENT: &str = "message.sent";

/// A payload bound to one topic. Producers validate before sending and
/// consumers validate on receipt; the key partitions by message id so the
/// per-message stage order survives the trip.
pub trait TopicPayload: Serialize + DeserializeOwned + Send + Sync {
    const TOPIC: &'static str;

    fn key(&self) -> String;

    fn validate(&self) -> Result<(), String>;
}

/// Stage 1: the raw submission as the client sent it. The body here is the
/// pre-sanitization text so the analyzer sees what the user actually wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl InboundMessage {
    pub fn new(id: MessageId, room_id: RoomId, sender_id: UserId, body: String) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            body,
            timestamp: Utc::now(),
            kind: MESSAGE_SENT.to_string(),
        }
    }
}

impl TopicPayload for InboundMessage {
    const TOPIC: &'static str = TOPIC_INBOUND;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn validate(&self) -> Result<(), String> {
        if self.kind != MESSAGE_SENT {
            return Err(format!("unexpected event type: {}", self.kind));
        }
        if self.body.is_empty() {
            return Err("empty body".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerdictConfidence {
    pub sentiment: f64,
    pub flagged: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub sentiment: Sentiment,
    pub flagged: bool,
    pub reasons: Vec<String>,
    pub confidence: VerdictConfidence,
}

impl ModerationVerdict {
    /// Verdict used whenever the analyzer is unreachable or errors, so the
    /// pipeline always advances.
    pub fn fallback() -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            flagged: false,
            reasons: Vec::new(),
            confidence: VerdictConfidence {
                sentiment: 0.5,
                flagged: 0.5,
            },
        }
    }

    fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("confidence.sentiment", self.confidence.sentiment),
            ("confidence.flagged", self.confidence.flagged),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} out of range: {value}"));
            }
        }
        Ok(())
    }
}

/// Stage 2: the inbound payload plus the analyzer verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratedMessage {
    #[serde(flatten)]
    pub inbound: InboundMessage,
    pub moderation: ModerationVerdict,
    pub processed_at: DateTime<Utc>,
}

impl TopicPayload for ModeratedMessage {
    const TOPIC: &'static str = TOPIC_MODERATED;

    fn key(&self) -> String {
        self.inbound.id.to_string()
    }

    fn validate(&self) -> Result<(), String> {
        self.inbound.validate()?;
        self.moderation.validate()
    }
}

/// Stage 3: the moderated payload plus the stored document's identity and
/// timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    #[serde(flatten)]
    pub moderated: ModeratedMessage,
    #[serde(rename = "_id")]
    pub doc_id: MessageId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TopicPayload for PersistedMessage {
    const TOPIC: &'static str = TOPIC_PERSISTED;

    fn key(&self) -> String {
        self.doc_id.to_string()
    }

    fn validate(&self) -> Result<(), String> {
        self.moderated.validate()?;
        if self.doc_id != self.moderated.inbound.id {
            return Err("document id does not match message id".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> InboundMessage {
        InboundMessage::new(MessageId::new(), RoomId::new(), UserId::new(), "hi".to_string())
    }

    #[test]
    fn inbound_serializes_flat_camel_case() {
        let payload = inbound();
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("roomId").is_some());
        assert!(json.get("senderId").is_some());
        assert_eq!(json["type"], MESSAGE_SENT);
    }

    #[test]
    fn moderated_embeds_inbound_fields_at_top_level() {
        let payload = ModeratedMessage {
            inbound: inbound(),
            moderation: ModerationVerdict::fallback(),
            processed_at: Utc::now(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("roomId").is_some());
        assert!(json.get("moderation").is_some());
        assert!(json.get("processedAt").is_some());

        let round_trip: ModeratedMessage = serde_json::from_value(json).unwrap();
        assert_eq!(round_trip, payload);
    }

    #[test]
    fn persisted_checks_id_consistency() {
        let moderated = ModeratedMessage {
            inbound: inbound(),
            moderation: ModerationVerdict::fallback(),
            processed_at: Utc::now(),
        };
        let ok = PersistedMessage {
            doc_id: moderated.inbound.id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            moderated: moderated.clone(),
        };
        assert!(ok.validate().is_ok());

        let bad = PersistedMessage { doc_id: MessageId::new(), ..ok };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn wrong_event_type_fails_validation() {
        let mut payload = inbound();
        payload.kind = "message.edited".to_string();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn out_of_range_confidence_fails_validation() {
        let mut verdict = ModerationVerdict::fallback();
        verdict.confidence.flagged = 1.5;
        let payload = ModeratedMessage {
            inbound: inbound(),
            moderation: verdict,
            processed_at: Utc::now(),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn fallback_verdict_matches_contract() {
        let verdict = ModerationVerdict::fallback();
        assert_eq!(verdict.sentiment, Sentiment::Neutral);
        assert!(!verdict.flagged);
        assert!(verdict.reasons.is_empty());
        assert_eq!(verdict.confidence.sentiment, 0.5);
        assert_eq!(verdict.confidence.flagged, 0.5);
    }
}
