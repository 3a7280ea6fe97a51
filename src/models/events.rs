use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, MessageView, RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Presence blob stored per user in the `user:presence` hash. Heartbeats
/// refresh `last_seen`; a blob older than the staleness window reads as
/// offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub status: PresenceStatus,
    pub socket_id: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Events a client may send over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    Typing {
        room_id: RoomId,
        is_typing: bool,
    },
    SendMessage {
        room_id: RoomId,
        body: String,
    },
    ReadReceipt {
        room_id: RoomId,
        #[serde(default)]
        message_id: Option<MessageId>,
    },
    Pong,
}

/// Events the server emits to room channels or individual sockets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    MessageCreated {
        message: MessageView,
    },
    MessageUpdated {
        message: MessageView,
    },
    MessageDeleted {
        room_id: RoomId,
        message_id: MessageId,
    },
    Typing {
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    },
    Presence {
        room_id: RoomId,
        user_id: UserId,
        status: PresenceStatus,
    },
    ReadReceipt {
        room_id: RoomId,
        user_id: UserId,
        /// Message id, or `"latest"` when the client acknowledged everything.
        message_id: String,
        read_at: DateTime<Utc>,
    },
    Ping,
    Error {
        code: String,
        message: String,
    },
}
