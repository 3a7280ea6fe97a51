use chrono::Utc;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;

use crate::broker::{EventPublisher, InboundMessage};
use crate::database::Database;
use crate::errors::MessageError;
use crate::models::{
    Message, MessageId, MessageView, ModerationMeta, Paginated, RoomId, User,
};
use crate::ratelimit::{self, SlidingWindowLimiter};
use crate::sanitize::sanitize_message_body;
use crate::services::cache::HotMessageCache;
use crate::services::room::RoomService;

const BODY_MAX_CHARS: usize = 2000;
const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub cursor: Option<MessageId>,
}

/// Write-through path for sends and the paginated history read path.
///
/// A send is admitted by the rate limiter, sanitized, stored with a neutral
/// verdict, pushed to the hot cache and produced to the inbound topic. The
/// inbound event carries the original body (the analyzer wants raw text);
/// everything user-facing carries the sanitized body.
pub struct MessageService {
    db: Database,
    rooms: Arc<RoomService>,
    limiter: Arc<SlidingWindowLimiter>,
    cache: Arc<HotMessageCache>,
    producer: Arc<dyn EventPublisher>,
}

impl MessageService {
    pub fn new(
        db: Database,
        rooms: Arc<RoomService>,
        limiter: Arc<SlidingWindowLimiter>,
        cache: Arc<HotMessageCache>,
        producer: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            db,
            rooms,
            limiter,
            cache,
            producer,
        }
    }

    fn sanitize_body(body: &str) -> Result<String, MessageError> {
        let sanitized = sanitize_message_body(body);
        if sanitized.is_empty() {
            return Err(MessageError::InvalidBody {
                reason: "must not be empty".to_string(),
            });
        }
        if sanitized.chars().count() > BODY_MAX_CHARS {
            return Err(MessageError::InvalidBody {
                reason: format!("must be at most {BODY_MAX_CHARS} characters"),
            });
        }
        Ok(sanitized)
    }

    pub async fn send(
        &self,
        room_id: RoomId,
        body: &str,
        sender: &User,
        client_ip: Option<IpAddr>,
    ) -> Result<MessageView, MessageError> {
        let decision = self
            .limiter
            .check(ratelimit::MESSAGE_USER, &sender.id.to_string())
            .await;
        if !decision.allowed {
            return Err(MessageError::RateLimited {
                retry_after: decision.retry_after_secs,
            });
        }
        if let Some(ip) = client_ip {
            let decision = self
                .limiter
                .check(ratelimit::MESSAGE_IP, &ip.to_string())
                .await;
            if !decision.allowed {
                return Err(MessageError::RateLimited {
                    retry_after: decision.retry_after_secs,
                });
            }
        }

        self.rooms.get(room_id).await?;
        self.rooms.ensure_member(room_id, sender.id).await?;

        let sanitized = Self::sanitize_body(body)?;
        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            room_id,
            sender_id: sender.id,
            body: sanitized,
            moderation: ModerationMeta::default(),
            edited_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_message(&message).await?;

        let view = message.to_view();
        if let Err(err) = self.cache.prepend(room_id, view.clone()).await {
            warn!(room = %room_id, "cache write failed after send: {err}");
        }

        // Raw body on purpose: the analyzer judges the submitted text, not
        // the sanitized rendering. A produce failure never fails the send.
        let inbound = InboundMessage::new(message.id, room_id, sender.id, body.to_string());
        if let Err(err) = self.producer.publish_inbound(&inbound).await {
            warn!(message_id = %message.id, "inbound produce failed: {err}");
        }

        Ok(view)
    }

    pub async fn list(
        &self,
        room_id: RoomId,
        query: HistoryQuery,
        caller: &User,
    ) -> Result<Paginated<MessageView>, MessageError> {
        self.rooms.get(room_id).await?;
        self.rooms.ensure_member(room_id, caller.id).await?;

        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        // First page without a cursor is the hot path; serve it from the
        // cache when the ring is warm.
        if page == 1 && query.cursor.is_none() {
            if let Ok(Some(cached)) = self.cache.get_recent_messages(room_id).await {
                if !cached.is_empty() {
                    let total = self.db.count_room_messages(room_id).await.unwrap_or_else(|err| {
                        warn!(room = %room_id, "history count failed, using cache size: {err}");
                        cached.len() as i64
                    });
                    return Ok(Self::paginate(
                        cached.into_iter().take(limit as usize).collect(),
                        total,
                        page,
                        limit,
                        false,
                    ));
                }
            }
        }

        let before = match query.cursor {
            Some(cursor) => {
                let anchor = self
                    .db
                    .get_message(cursor)
                    .await?
                    .filter(|m| m.room_id == room_id)
                    .ok_or(MessageError::NotFound { message_id: cursor })?;
                Some(anchor.created_at)
            }
            None => None,
        };

        let offset = i64::from(page - 1) * i64::from(limit);
        let messages = self
            .db
            .list_room_messages(room_id, i64::from(limit), offset, before)
            .await?;
        let total = self.db.count_room_messages(room_id).await?;
        let views: Vec<MessageView> = messages.iter().map(Message::to_view).collect();

        if page == 1 && query.cursor.is_none() {
            if let Err(err) = self
                .cache
                .cache_recent_messages(room_id, views.clone())
                .await
            {
                warn!(room = %room_id, "cache refresh failed: {err}");
            }
        }

        Ok(Self::paginate(views, total, page, limit, query.cursor.is_some()))
    }

    fn paginate(
        items: Vec<MessageView>,
        total: i64,
        page: u32,
        limit: u32,
        cursored: bool,
    ) -> Paginated<MessageView> {
        let limit_i64 = i64::from(limit);
        let total_pages = ((total + limit_i64 - 1) / limit_i64).max(1) as u32;
        let has_next = if cursored {
            items.len() == limit as usize
        } else {
            page < total_pages
        };
        Paginated {
            has_next,
            has_prev: page > 1 || cursored,
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }

    /// Load a live message or report it as missing; soft-deleted rows are
    /// indistinguishable from absent ones to callers.
    async fn get_live(&self, message_id: MessageId) -> Result<Message, MessageError> {
        self.db
            .get_message(message_id)
            .await?
            .filter(|m| !m.is_deleted())
            .ok_or(MessageError::NotFound { message_id })
    }

    pub async fn get(&self, message_id: MessageId, caller: &User) -> Result<MessageView, MessageError> {
        let message = self.get_live(message_id).await?;
        self.rooms.ensure_member(message.room_id, caller.id).await?;
        Ok(message.to_view())
    }

    pub async fn update(
        &self,
        message_id: MessageId,
        body: &str,
        caller: &User,
    ) -> Result<MessageView, MessageError> {
        let message = self.get_live(message_id).await?;
        if message.sender_id != caller.id {
            return Err(MessageError::NotSender);
        }

        let sanitized = Self::sanitize_body(body)?;
        let edited_at = Utc::now();
        self.db
            .update_message_body(message_id, &sanitized, edited_at)
            .await?;

        if let Err(err) = self.cache.invalidate(message.room_id).await {
            warn!(room = %message.room_id, "cache invalidation failed after edit: {err}");
        }

        self.get_live(message_id).await.map(|m| m.to_view())
    }

    pub async fn delete(&self, message_id: MessageId, caller: &User) -> Result<Message, MessageError> {
        let message = self.get_live(message_id).await?;
        if message.sender_id != caller.id {
            return Err(MessageError::NotSender);
        }

        let deleted_at = Utc::now();
        self.db.soft_delete_message(message_id, deleted_at).await?;

        if let Err(err) = self.cache.invalidate(message.room_id).await {
            warn!(room = %message.room_id, "cache invalidation failed after delete: {err}");
        }

        Ok(Message {
            deleted_at: Some(deleted_at),
            ..message
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{ModeratedMessage, PersistedMessage};
    use crate::database::test_support::*;
    use crate::errors::{BrokerError, RoomError};
    use crate::kv::MemoryStore;
    use crate::models::{MemberRole, RoomType};
    use crate::services::room::CreateRoomInput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        inbound: Mutex<Vec<InboundMessage>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish_inbound(&self, payload: &InboundMessage) -> Result<(), BrokerError> {
            if *self.fail.lock().unwrap() {
                return Err(BrokerError::Schema {
                    topic: crate::broker::TOPIC_INBOUND,
                    reason: "forced failure".to_string(),
                });
            }
            self.inbound.lock().unwrap().push(payload.clone());
            Ok(())
        }

        async fn publish_moderated(&self, _payload: &ModeratedMessage) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish_persisted(&self, _payload: &PersistedMessage) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    struct Fixture {
        service: MessageService,
        publisher: Arc<RecordingPublisher>,
        sender: User,
        outsider: User,
        room: crate::models::Room,
    }

    async fn fixture() -> Fixture {
        let db = memory_db().await;
        let store = Arc::new(MemoryStore::new());
        let rooms = Arc::new(RoomService::new(db.clone()));
        let publisher = Arc::new(RecordingPublisher::default());

        let sender = test_user("sender@example.com");
        let outsider = test_user("outsider@example.com");
        db.create_user(&sender).await.unwrap();
        db.create_user(&outsider).await.unwrap();

        let room = rooms
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

        let service = MessageService::new(
            db,
            rooms,
            Arc::new(SlidingWindowLimiter::new(store.clone())),
            Arc::new(HotMessageCache::new(store)),
            publisher.clone(),
        );

        Fixture { service, publisher, sender, outsider, room }
    }

    #[tokio::test]
    async fn send_stores_sanitized_but_produces_raw() {
        let f = fixture().await;
        let raw = "<script>evil()</script>hello";

        let view = f.service.send(f.room.id, raw, &f.sender, None).await.unwrap();
        assert_eq!(view.body, "hello");
        assert_eq!(view.moderation, ModerationMeta::default());

        let produced = f.publisher.inbound.lock().unwrap();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].body, raw);
        assert_eq!(produced[0].id, view.id);
    }

    #[tokio::test]
    async fn produce_failure_does_not_fail_the_send() {
        let f = fixture().await;
        *f.publisher.fail.lock().unwrap() = true;

        let view = f.service.send(f.room.id, "hello", &f.sender, None).await.unwrap();
        assert_eq!(view.body, "hello");
    }

    #[tokio::test]
    async fn non_members_cannot_send_or_read() {
        let f = fixture().await;
        assert!(matches!(
            f.service.send(f.room.id, "hi", &f.outsider, None).await,
            Err(MessageError::Room(RoomError::NotAMember { .. }))
        ));

        let view = f.service.send(f.room.id, "hi", &f.sender, None).await.unwrap();
        assert!(matches!(
            f.service.get(view.id, &f.outsider).await,
            Err(MessageError::Room(RoomError::NotAMember { .. }))
        ));
    }

    #[tokio::test]
    async fn sending_to_missing_room_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.service.send(RoomId::new(), "hi", &f.sender, None).await,
            Err(MessageError::Room(RoomError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn user_rate_limit_kicks_in_at_the_quota() {
        let f = fixture().await;
        for _ in 0..ratelimit::MESSAGE_USER.limit {
            f.service.send(f.room.id, "spam", &f.sender, None).await.unwrap();
        }
        let denied = f.service.send(f.room.id, "one too many", &f.sender, None).await;
        match denied {
            Err(MessageError::RateLimited { retry_after }) => assert!(retry_after > 0),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn edit_is_sender_only_and_sets_edited_at() {
        let f = fixture().await;
        let view = f.service.send(f.room.id, "original", &f.sender, None).await.unwrap();

        assert!(matches!(
            f.service.update(view.id, "hijacked", &f.outsider).await,
            Err(MessageError::NotSender)
        ));

        let updated = f.service.update(view.id, "edited", &f.sender).await.unwrap();
        assert_eq!(updated.body, "edited");
        assert!(updated.edited_at.is_some());
    }

    #[tokio::test]
    async fn soft_delete_hides_from_reads_and_history() {
        let f = fixture().await;
        let view = f.service.send(f.room.id, "to be removed", &f.sender, None).await.unwrap();

        f.service.delete(view.id, &f.sender).await.unwrap();
        assert!(matches!(
            f.service.get(view.id, &f.sender).await,
            Err(MessageError::NotFound { .. })
        ));

        let history = f
            .service
            .list(f.room.id, HistoryQuery::default(), &f.sender)
            .await
            .unwrap();
        assert!(history.items.iter().all(|m| m.id != view.id));

        // A second delete reports NotFound as well.
        assert!(matches!(
            f.service.delete(view.id, &f.sender).await,
            Err(MessageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn first_page_is_served_and_cached() {
        let f = fixture().await;
        for i in 0..5 {
            f.service
                .send(f.room.id, &format!("m{i}"), &f.sender, None)
                .await
                .unwrap();
        }

        let page = f
            .service
            .list(f.room.id, HistoryQuery::default(), &f.sender)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].body, "m4");
        assert!(!page.has_next);
        assert!(!page.has_prev);
    }

    #[tokio::test]
    async fn pagination_round_trips_without_overlap() {
        let f = fixture().await;
        let mut sent = Vec::new();
        for i in 0..12 {
            sent.push(
                f.service
                    .send(f.room.id, &format!("m{i}"), &f.sender, None)
                    .await
                    .unwrap(),
            );
            // Distinct created_at per message keeps the order deterministic.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let mut collected = Vec::new();
        for page in 1..=3 {
            let result = f
                .service
                .list(
                    f.room.id,
                    HistoryQuery { page: Some(page), limit: Some(5), cursor: None },
                    &f.sender,
                )
                .await
                .unwrap();
            assert_eq!(result.total, 12);
            collected.extend(result.items);
        }

        let expected: Vec<_> = sent.iter().rev().map(|m| m.id).collect();
        let got: Vec<_> = collected.iter().map(|m| m.id).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn cursor_pages_strictly_older() {
        let f = fixture().await;
        let mut sent = Vec::new();
        for i in 0..6 {
            sent.push(
                f.service
                    .send(f.room.id, &format!("m{i}"), &f.sender, None)
                    .await
                    .unwrap(),
            );
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        // Anchor on the 3rd-newest message; everything returned must be
        // strictly older.
        let anchor = sent[3].clone();
        let result = f
            .service
            .list(
                f.room.id,
                HistoryQuery { page: None, limit: Some(10), cursor: Some(anchor.id) },
                &f.sender,
            )
            .await
            .unwrap();

        let bodies: Vec<_> = result.items.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m1", "m0"]);
        assert!(result.has_prev);
    }
}
