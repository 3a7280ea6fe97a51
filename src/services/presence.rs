use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use crate::errors::StoreError;
use crate::kv::KeyValueStore;
use crate::models::{PresenceRecord, PresenceStatus, RoomId, UserId};

const USER_PRESENCE_KEY: &str = "user:presence";
const ROOM_USERS_KEY: &str = "room:users";
const USER_ROOMS_KEY: &str = "user:rooms";

/// A presence blob older than this reads as offline even if the user never
/// disconnected cleanly.
const STALE_AFTER_SECS: i64 = 30;

/// Store-backed registry of the user ↔ socket ↔ room triangle.
///
/// Heartbeats refresh the per-user blob every 20 s; queries treat a blob
/// without a recent heartbeat as offline rather than trusting it.
pub struct PresenceRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl PresenceRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn set_online(&self, user_id: UserId, socket_id: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        let record = PresenceRecord {
            status: PresenceStatus::Online,
            socket_id: Some(socket_id.to_string()),
            last_seen: now,
            connected_at: Some(now),
        };
        self.write_record(user_id, &record).await
    }

    pub async fn set_offline(&self, user_id: UserId) -> Result<(), StoreError> {
        let record = PresenceRecord {
            status: PresenceStatus::Offline,
            socket_id: None,
            last_seen: Utc::now(),
            connected_at: None,
        };
        self.write_record(user_id, &record).await
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<PresenceRecord>, StoreError> {
        let raw = self
            .store
            .hget(USER_PRESENCE_KEY, &user_id.to_string())
            .await?;
        let Some(raw) = raw else { return Ok(None) };

        let mut record: PresenceRecord = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Malformed(format!("presence blob: {e}")))?;

        if record.status == PresenceStatus::Online
            && Utc::now() - record.last_seen > ChronoDuration::seconds(STALE_AFTER_SECS)
        {
            record.status = PresenceStatus::Offline;
            record.socket_id = None;
        }
        Ok(Some(record))
    }

    /// Refresh `last_seen` on the existing blob. No-op for users without a
    /// presence record.
    pub async fn heartbeat(&self, user_id: UserId) -> Result<(), StoreError> {
        let raw = self
            .store
            .hget(USER_PRESENCE_KEY, &user_id.to_string())
            .await?;
        if let Some(raw) = raw {
            if let Ok(mut record) = serde_json::from_str::<PresenceRecord>(&raw) {
                record.last_seen = Utc::now();
                self.write_record(user_id, &record).await?;
            }
        }
        Ok(())
    }

    pub async fn add_to_room(&self, user_id: UserId, room_id: RoomId) -> Result<(), StoreError> {
        self.store
            .hset(ROOM_USERS_KEY, &format!("{room_id}:{user_id}"), "1")
            .await?;
        self.store
            .hset(USER_ROOMS_KEY, &format!("{user_id}:{room_id}"), "1")
            .await
    }

    pub async fn remove_from_room(&self, user_id: UserId, room_id: RoomId) -> Result<(), StoreError> {
        self.store
            .hdel(ROOM_USERS_KEY, &format!("{room_id}:{user_id}"))
            .await?;
        self.store
            .hdel(USER_ROOMS_KEY, &format!("{user_id}:{room_id}"))
            .await
    }

    pub async fn room_users(&self, room_id: RoomId) -> Result<Vec<UserId>, StoreError> {
        let prefix = format!("{room_id}:");
        let fields = self.store.hgetall(ROOM_USERS_KEY).await?;
        Ok(fields
            .keys()
            .filter_map(|field| field.strip_prefix(&prefix))
            .filter_map(|raw| raw.parse().ok())
            .collect())
    }

    pub async fn user_rooms(&self, user_id: UserId) -> Result<Vec<RoomId>, StoreError> {
        let prefix = format!("{user_id}:");
        let fields = self.store.hgetall(USER_ROOMS_KEY).await?;
        Ok(fields
            .keys()
            .filter_map(|field| field.strip_prefix(&prefix))
            .filter_map(|raw| raw.parse().ok())
            .collect())
    }

    /// Drop the user from every room and mark them offline. Used on socket
    /// teardown.
    pub async fn cleanup_user(&self, user_id: UserId) -> Result<Vec<RoomId>, StoreError> {
        let rooms = self.user_rooms(user_id).await?;
        for room_id in &rooms {
            self.remove_from_room(user_id, *room_id).await?;
        }
        self.set_offline(user_id).await?;
        Ok(rooms)
    }

    async fn write_record(&self, user_id: UserId, record: &PresenceRecord) -> Result<(), StoreError> {
        let blob = serde_json::to_string(record)
            .map_err(|e| StoreError::Malformed(format!("presence blob: {e}")))?;
        self.store
            .hset(USER_PRESENCE_KEY, &user_id.to_string(), &blob)
            .await
    }
}
