use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::errors::StoreError;
use crate::kv::KeyValueStore;
use crate::models::{MessageView, RoomId};

const CACHE_TTL: Duration = Duration::from_secs(300);
const MAX_ENTRIES: usize = 50;

fn cache_key(room_id: RoomId) -> String {
    format!("recent:room:{room_id}")
}

/// Per-room ring of the most recent message projections, newest first.
///
/// The cache is advisory: cold reads fall through to the database, and
/// invalidation after edit/delete is best-effort (the next write re-caches;
/// the stale window is bounded by the TTL).
pub struct HotMessageCache {
    store: Arc<dyn KeyValueStore>,
}

impl HotMessageCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn cache_recent_messages(
        &self,
        room_id: RoomId,
        mut messages: Vec<MessageView>,
    ) -> Result<(), StoreError> {
        messages.truncate(MAX_ENTRIES);
        let blob = serde_json::to_string(&messages)
            .map_err(|e| StoreError::Malformed(format!("cache blob: {e}")))?;
        self.store
            .set(&cache_key(room_id), &blob, Some(CACHE_TTL))
            .await
    }

    pub async fn get_recent_messages(
        &self,
        room_id: RoomId,
    ) -> Result<Option<Vec<MessageView>>, StoreError> {
        let raw = self.store.get(&cache_key(room_id)).await?;
        let Some(raw) = raw else { return Ok(None) };
        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(Some(messages)),
            Err(e) => {
                // Poisoned entries are dropped rather than served.
                warn!(room = %room_id, "discarding undecodable cache entry: {e}");
                self.store.del(&cache_key(room_id)).await?;
                Ok(None)
            }
        }
    }

    /// Prepend a fresh message to the ring, re-truncating to the cap. A cold
    /// cache starts a new ring with just this message.
    pub async fn prepend(&self, room_id: RoomId, message: MessageView) -> Result<(), StoreError> {
        let mut messages = self.get_recent_messages(room_id).await?.unwrap_or_default();
        messages.retain(|m| m.id != message.id);
        messages.insert(0, message);
        self.cache_recent_messages(room_id, messages).await
    }

    pub async fn invalidate(&self, room_id: RoomId) -> Result<(), StoreError> {
        self.store.del(&cache_key(room_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::models::{MessageId, ModerationMeta, UserId};
    use chrono::Utc;

    fn cache() -> HotMessageCache {
        HotMessageCache::new(Arc::new(MemoryStore::new()))
    }

    fn view(room_id: RoomId, body: &str) -> MessageView {
        let now = Utc::now();
        MessageView {
            id: MessageId::new(),
            room_id,
            sender_id: UserId::new(),
            body: body.to_string(),
            moderation: ModerationMeta::default(),
            edited_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn cold_read_is_none() {
        let cache = cache();
        assert!(cache.get_recent_messages(RoomId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prepend_keeps_newest_first() {
        let cache = cache();
        let room = RoomId::new();

        cache.prepend(room, view(room, "first")).await.unwrap();
        cache.prepend(room, view(room, "second")).await.unwrap();

        let messages = cache.get_recent_messages(room).await.unwrap().unwrap();
        assert_eq!(messages[0].body, "second");
        assert_eq!(messages[1].body, "first");
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let cache = cache();
        let room = RoomId::new();

        for i in 0..60 {
            cache.prepend(room, view(room, &format!("m{i}"))).await.unwrap();
        }

        let messages = cache.get_recent_messages(room).await.unwrap().unwrap();
        assert_eq!(messages.len(), MAX_ENTRIES);
        assert_eq!(messages[0].body, "m59");
    }

    #[tokio::test]
    async fn invalidate_clears_the_ring() {
        let cache = cache();
        let room = RoomId::new();

        cache.prepend(room, view(room, "m")).await.unwrap();
        cache.invalidate(room).await.unwrap();
        assert!(cache.get_recent_messages(room).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rooms_do_not_share_rings() {
        let cache = cache();
        let room_a = RoomId::new();
        let room_b = RoomId::new();

        cache.prepend(room_a, view(room_a, "a")).await.unwrap();
        assert!(cache.get_recent_messages(room_b).await.unwrap().is_none());
    }
}
