use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{ConnectionId, RoomId, ServerEvent};

pub type SocketSender = UnboundedSender<String>;

/// One logical channel per room (`room:<roomId>`). Broadcasts serialize the
/// event once and go through the channel membership, never by iterating
/// sockets; a user with several sockets in a room gets the event on each.
#[derive(Default)]
pub struct RoomChannels {
    rooms: RwLock<HashMap<RoomId, HashMap<ConnectionId, SocketSender>>>,
}

impl RoomChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_name(room_id: RoomId) -> String {
        format!("room:{room_id}")
    }

    pub async fn join(&self, room_id: RoomId, connection_id: ConnectionId, sender: SocketSender) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_id).or_default().insert(connection_id, sender);
        debug!(channel = %Self::channel_name(room_id), connection = %connection_id, "joined");
    }

    pub async fn leave(&self, room_id: RoomId, connection_id: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&room_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                rooms.remove(&room_id);
            }
        }
    }

    /// Remove the connection from every channel, returning the rooms it was
    /// subscribed to.
    pub async fn leave_all(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        rooms.retain(|room_id, members| {
            if members.remove(&connection_id).is_some() {
                left.push(*room_id);
            }
            !members.is_empty()
        });
        left
    }

    /// Send the event to every socket in the room. Closed sockets are pruned
    /// on the way; returns how many sockets received the event.
    pub async fn broadcast(&self, room_id: RoomId, event: &ServerEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(channel = %Self::channel_name(room_id), "event serialization failed: {err}");
                return 0;
            }
        };

        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(&room_id) else { return 0 };

        let mut delivered = 0;
        members.retain(|_, sender| {
            if sender.send(payload.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        if members.is_empty() {
            rooms.remove(&room_id);
        }
        delivered
    }
}
