use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relaychat::broker::{
    EventPublisher, InboundMessage, ModeratedMessage, ModerationVerdict, PersistedMessage,
};
use relaychat::config::AnalyzerConfig;
use relaychat::database::Database;
use relaychat::errors::BrokerError;
use relaychat::kv::MemoryStore;
use relaychat::models::{MessageView, RoomId, RoomType, Sentiment};
use relaychat::pipeline::{AnalyzerClient, FanoutSink, PipelineProcessor};
use relaychat::ratelimit::SlidingWindowLimiter;
use relaychat::services::{
    AuthService, CreateRoomInput, HistoryQuery, HotMessageCache, MessageService, RoomService,
    TokenService,
};

#[derive(Default)]
struct RecordingPublisher {
    inbound: Mutex<Vec<InboundMessage>>,
    moderated: Mutex<Vec<ModeratedMessage>>,
    persisted: Mutex<Vec<PersistedMessage>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_inbound(&self, payload: &InboundMessage) -> Result<(), BrokerError> {
        self.inbound.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn publish_moderated(&self, payload: &ModeratedMessage) -> Result<(), BrokerError> {
        self.moderated.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn publish_persisted(&self, payload: &PersistedMessage) -> Result<(), BrokerError> {
        self.persisted.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    updates: Mutex<Vec<(RoomId, MessageView)>>,
}

#[async_trait]
impl FanoutSink for RecordingSink {
    async fn emit_message_updated(&self, room_id: RoomId, message: MessageView) {
        self.updates.lock().unwrap().push((room_id, message));
    }
}

struct Stack {
    db: Database,
    messages: Arc<MessageService>,
    processor: PipelineProcessor,
    publisher: Arc<RecordingPublisher>,
    sink: Arc<RecordingSink>,
    auth: AuthService,
    rooms: Arc<RoomService>,
}

async fn stack() -> Stack {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let sink = Arc::new(RecordingSink::default());

    let rooms = Arc::new(RoomService::new(db.clone()));
    let messages = Arc::new(MessageService::new(
        db.clone(),
        rooms.clone(),
        Arc::new(SlidingWindowLimiter::new(store.clone())),
        Arc::new(HotMessageCache::new(store.clone())),
        publisher.clone(),
    ));

    // Nothing listens at this address: every analyzer call degrades to the
    // fallback verdict, which is exactly the failure-path contract.
    let analyzer = AnalyzerClient::new(&AnalyzerConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        shared_secret: "secret".to_string(),
        request_timeout: Duration::from_millis(100),
    })
    .unwrap();
    let processor = PipelineProcessor::new(db.clone(), publisher.clone(), analyzer, sink.clone());

    let tokens = Arc::new(TokenService::new(
        &relaychat::config::JwtConfig {
            access_secret: "a".to_string(),
            refresh_secret: "r".to_string(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(3600),
        },
        store,
    ));
    let auth = AuthService::new(db.clone(), tokens);

    Stack { db, messages, processor, publisher, sink, auth, rooms }
}

#[tokio::test]
async fn submission_flows_through_all_three_stages() {
    let stack = stack().await;

    let sender = stack
        .auth
        .register("sender@x.io", "Passw0rd!", "Sender")
        .await
        .unwrap()
        .user;
    let room = stack
        .rooms
        .create(
            CreateRoomInput {
                name: "general".to_string(),
                room_type: RoomType::Channel,
                is_private: false,
            },
            &sender,
        )
        .await
        .unwrap();

    // Stage 0: the HTTP write path stores the message and produces inbound.
    let raw_body = "<b onclick=x>hello</b> world";
    let view = stack
        .messages
        .send(room.id, raw_body, &sender, None)
        .await
        .unwrap();
    assert_eq!(view.body, "<b>hello</b> world");
    assert_eq!(view.moderation.sentiment, Sentiment::Neutral);

    let inbound = stack.publisher.inbound.lock().unwrap().pop().unwrap();
    assert_eq!(inbound.body, raw_body, "analyzer must see the raw text");
    assert_eq!(inbound.id, view.id);

    // Stage 1: inbound → moderated. The analyzer is down, so the fallback
    // verdict keeps the pipeline moving.
    stack.processor.handle_inbound(inbound).await.unwrap();
    let moderated = stack.publisher.moderated.lock().unwrap().pop().unwrap();
    assert_eq!(moderated.moderation, ModerationVerdict::fallback());
    assert_eq!(moderated.inbound.id, view.id);

    // Stage 2: moderated → persisted + fan-out.
    stack.processor.handle_moderated(moderated).await.unwrap();
    let persisted = stack.publisher.persisted.lock().unwrap().pop().unwrap();
    assert_eq!(persisted.doc_id, view.id);

    let updates = stack.sink.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, room.id);
    assert_eq!(updates[0].1.id, view.id);
}

#[tokio::test]
async fn a_positive_verdict_rewrites_the_stored_meta() {
    let stack = stack().await;

    let sender = stack
        .auth
        .register("sender@x.io", "Passw0rd!", "Sender")
        .await
        .unwrap()
        .user;
    let room = stack
        .rooms
        .create(
            CreateRoomInput {
                name: "general".to_string(),
                room_type: RoomType::Channel,
                is_private: false,
            },
            &sender,
        )
        .await
        .unwrap();

    let view = stack.messages.send(room.id, "hello", &sender, None).await.unwrap();
    let inbound = stack.publisher.inbound.lock().unwrap().pop().unwrap();

    let mut verdict = ModerationVerdict::fallback();
    verdict.sentiment = Sentiment::Positive;
    let moderated = ModeratedMessage {
        inbound,
        moderation: verdict,
        processed_at: Utc::now(),
    };
    stack.processor.handle_moderated(moderated).await.unwrap();

    // The fan-out carries the sanitized body with the rewritten meta.
    let updates = stack.sink.updates.lock().unwrap();
    assert_eq!(updates[0].1.moderation.sentiment, Sentiment::Positive);
    assert_eq!(updates[0].1.body, "hello");
    drop(updates);

    // The document store agrees; the hot cache may serve the neutral meta
    // until its TTL, which is the documented stale window.
    let stored = stack.db.get_message(view.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation.sentiment, Sentiment::Positive);
}

#[tokio::test]
async fn deleted_messages_never_reach_history_again() {
    let stack = stack().await;

    let sender = stack
        .auth
        .register("sender@x.io", "Passw0rd!", "Sender")
        .await
        .unwrap()
        .user;
    let room = stack
        .rooms
        .create(
            CreateRoomInput {
                name: "general".to_string(),
                room_type: RoomType::Channel,
                is_private: false,
            },
            &sender,
        )
        .await
        .unwrap();

    let kept = stack.messages.send(room.id, "kept", &sender, None).await.unwrap();
    let doomed = stack.messages.send(room.id, "doomed", &sender, None).await.unwrap();

    stack.messages.delete(doomed.id, &sender).await.unwrap();

    let history = stack
        .messages
        .list(room.id, HistoryQuery::default(), &sender)
        .await
        .unwrap();
    assert_eq!(history.total, 1);
    assert_eq!(history.items.len(), 1);
    assert_eq!(history.items[0].id, kept.id);

    // The row still exists for the database, but not for the API.
    assert!(stack.db.get_message(doomed.id).await.unwrap().unwrap().is_deleted());
    assert!(stack.messages.get(doomed.id, &sender).await.is_err());
}
