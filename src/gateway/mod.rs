pub mod channels;

pub use channels::{RoomChannels, SocketSender};

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::database::Database;
use crate::errors::{ApiError, MessageError};
use crate::middleware::bearer_token;
use crate::models::{
    ClientEvent, ConnectionId, MessageView, PresenceStatus, RoomId, ServerEvent, User, UserId,
};
use crate::pipeline::FanoutSink;
use crate::ratelimit::{self, SlidingWindowLimiter};
use crate::services::{MessageService, PresenceRegistry, RoomService};
use crate::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
/// Two missed heartbeats and change.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);
const TYPING_CLEAR_AFTER: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    token: Option<String>,
}

/// The realtime gateway: socket lifecycle, room channels, presence and
/// typing fan-out, heartbeat.
///
/// Typing auto-clear timers live in a gateway-owned map keyed by
/// (room, user); scheduling a new timer aborts the superseded one.
pub struct ChatGateway {
    channels: RoomChannels,
    presence: Arc<PresenceRegistry>,
    limiter: Arc<SlidingWindowLimiter>,
    db: Database,
    rooms: Arc<RoomService>,
    messages: Arc<MessageService>,
    typing: Mutex<HashMap<(RoomId, UserId), JoinHandle<()>>>,
}

impl ChatGateway {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        limiter: Arc<SlidingWindowLimiter>,
        db: Database,
        rooms: Arc<RoomService>,
        messages: Arc<MessageService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channels: RoomChannels::new(),
            presence,
            limiter,
            db,
            rooms,
            messages,
            typing: Mutex::new(HashMap::new()),
        })
    }

    pub async fn broadcast_message_created(&self, room_id: RoomId, message: MessageView) {
        self.channels
            .broadcast(room_id, &ServerEvent::MessageCreated { message })
            .await;
    }

    pub async fn broadcast_message_updated(&self, room_id: RoomId, message: MessageView) {
        self.channels
            .broadcast(room_id, &ServerEvent::MessageUpdated { message })
            .await;
    }

    pub async fn broadcast_message_deleted(&self, room_id: RoomId, message_id: crate::models::MessageId) {
        self.channels
            .broadcast(room_id, &ServerEvent::MessageDeleted { room_id, message_id })
            .await;
    }

    async fn broadcast_presence(&self, room_id: RoomId, user_id: UserId, status: PresenceStatus) {
        self.channels
            .broadcast(room_id, &ServerEvent::Presence { room_id, user_id, status })
            .await;
    }

    fn send_event(tx: &SocketSender, event: &ServerEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = tx.send(payload);
        }
    }

    fn send_error(tx: &SocketSender, code: &str, message: &str) {
        Self::send_event(
            tx,
            &ServerEvent::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Drives one authenticated socket until it closes.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, user: User) {
        let connection_id = ConnectionId::new();
        info!(user = %user.id, connection = %connection_id, "socket connected");

        let (mut ws_tx, mut ws_rx) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        if let Err(err) = self
            .presence
            .set_online(user.id, &connection_id.to_string())
            .await
        {
            warn!(user = %user.id, "presence set_online failed: {err}");
        }

        // Auto-join every room the user is a member of, then announce.
        let joined = match self.db.room_ids_for_user(user.id).await {
            Ok(rooms) => rooms,
            Err(err) => {
                error!(user = %user.id, "membership lookup failed on connect: {err}");
                Vec::new()
            }
        };
        for room_id in &joined {
            self.channels.join(*room_id, connection_id, tx.clone()).await;
            if let Err(err) = self.presence.add_to_room(user.id, *room_id).await {
                warn!(user = %user.id, room = %room_id, "presence add_to_room failed: {err}");
            }
        }
        for room_id in &joined {
            self.broadcast_presence(*room_id, user.id, PresenceStatus::Online)
                .await;
        }

        let last_pong = Arc::new(Mutex::new(Instant::now()));

        let mut outgoing = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if ws_tx.send(WsMessage::Text(payload)).await.is_err() {
                    break;
                }
            }
        });

        let mut heartbeat = tokio::spawn({
            let gateway = Arc::clone(&self);
            let tx = tx.clone();
            let last_pong = Arc::clone(&last_pong);
            let user_id = user.id;
            async move {
                let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let stale = last_pong
                        .lock()
                        .map(|at| at.elapsed() > HEARTBEAT_TIMEOUT)
                        .unwrap_or(true);
                    if stale {
                        debug!(user = %user_id, "heartbeat timed out");
                        break;
                    }
                    if let Ok(payload) = serde_json::to_string(&ServerEvent::Ping) {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    if let Err(err) = gateway.presence.heartbeat(user_id).await {
                        warn!(user = %user_id, "presence heartbeat failed: {err}");
                    }
                }
            }
        });

        let mut incoming = {
            let gateway = Arc::clone(&self);
            let user = user.clone();
            let tx = tx.clone();
            let last_pong = Arc::clone(&last_pong);
            tokio::spawn(async move {
                while let Some(frame) = ws_rx.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                let flow = gateway
                                    .handle_client_event(&user, connection_id, &tx, &last_pong, event)
                                    .await;
                                if flow.is_break() {
                                    break;
                                }
                            }
                            Err(err) => {
                                Self::send_error(
                                    &tx,
                                    "validation_failed",
                                    &format!("unrecognized event: {err}"),
                                );
                            }
                        },
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            debug!(connection = %connection_id, "socket error: {err}");
                            break;
                        }
                    }
                }
            })
        };

        // Whichever task finishes first (socket closed, send failure or a
        // heartbeat timeout) tears the whole connection down.
        tokio::select! {
            _ = &mut outgoing => {}
            _ = &mut heartbeat => {}
            _ = &mut incoming => {}
        }
        outgoing.abort();
        heartbeat.abort();
        incoming.abort();

        self.teardown(user.id, connection_id).await;
        info!(user = %user.id, connection = %connection_id, "socket closed");
    }

    async fn teardown(&self, user_id: UserId, connection_id: ConnectionId) {
        self.clear_typing_for(user_id);

        let mut rooms = self.channels.leave_all(connection_id).await;
        match self.presence.cleanup_user(user_id).await {
            Ok(presence_rooms) => {
                for room_id in presence_rooms {
                    if !rooms.contains(&room_id) {
                        rooms.push(room_id);
                    }
                }
            }
            Err(err) => warn!(user = %user_id, "presence cleanup failed: {err}"),
        }

        for room_id in rooms {
            self.broadcast_presence(room_id, user_id, PresenceStatus::Offline)
                .await;
        }
    }

    fn clear_typing_for(&self, user_id: UserId) {
        let mut timers = self.typing.lock().unwrap_or_else(|e| e.into_inner());
        timers.retain(|(_, uid), handle| {
            if *uid == user_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    async fn handle_client_event(
        self: &Arc<Self>,
        user: &User,
        connection_id: ConnectionId,
        tx: &SocketSender,
        last_pong: &Arc<Mutex<Instant>>,
        event: ClientEvent,
    ) -> ControlFlow<()> {
        match event {
            ClientEvent::JoinRoom { room_id } => {
                let decision = self
                    .limiter
                    .check(ratelimit::ROOM_JOIN_USER, &user.id.to_string())
                    .await;
                if !decision.allowed {
                    Self::send_error(tx, "rate_limited", "room join rate exceeded");
                    return ControlFlow::Break(());
                }

                match self.rooms.is_member(room_id, user.id).await {
                    Ok(true) => {
                        self.channels.join(room_id, connection_id, tx.clone()).await;
                        if let Err(err) = self.presence.add_to_room(user.id, room_id).await {
                            warn!(user = %user.id, room = %room_id, "presence join failed: {err}");
                        }
                        self.broadcast_presence(room_id, user.id, PresenceStatus::Online)
                            .await;
                    }
                    Ok(false) => Self::send_error(tx, "forbidden", "not a member of this room"),
                    Err(err) => {
                        error!(room = %room_id, "membership check failed: {err}");
                        Self::send_error(tx, "internal", "internal server error");
                    }
                }
            }
            ClientEvent::LeaveRoom { room_id } => {
                self.channels.leave(room_id, connection_id).await;
                if let Err(err) = self.presence.remove_from_room(user.id, room_id).await {
                    warn!(user = %user.id, room = %room_id, "presence leave failed: {err}");
                }
                self.broadcast_presence(room_id, user.id, PresenceStatus::Offline)
                    .await;
            }
            ClientEvent::Typing { room_id, is_typing } => {
                match self.rooms.is_member(room_id, user.id).await {
                    Ok(true) => {
                        self.channels
                            .broadcast(
                                room_id,
                                &ServerEvent::Typing { room_id, user_id: user.id, is_typing },
                            )
                            .await;
                        self.schedule_typing_clear(room_id, user.id, is_typing);
                    }
                    Ok(false) => Self::send_error(tx, "forbidden", "not a member of this room"),
                    Err(err) => {
                        error!(room = %room_id, "membership check failed: {err}");
                        Self::send_error(tx, "internal", "internal server error");
                    }
                }
            }
            ClientEvent::SendMessage { room_id, body } => {
                match self.messages.send(room_id, &body, user, None).await {
                    Ok(message) => {
                        self.broadcast_message_created(room_id, message).await;
                    }
                    Err(MessageError::RateLimited { retry_after }) => {
                        Self::send_error(
                            tx,
                            "rate_limited",
                            &format!("rate limit exceeded, retry after {retry_after}s"),
                        );
                        return ControlFlow::Break(());
                    }
                    Err(err) => {
                        let api: ApiError = err.into();
                        Self::send_error(tx, api.code(), &api.to_string());
                    }
                }
            }
            ClientEvent::ReadReceipt { room_id, message_id } => {
                match self.rooms.is_member(room_id, user.id).await {
                    Ok(true) => {
                        let read_at = Utc::now();
                        if let Err(err) = self
                            .db
                            .update_last_read(room_id, user.id, message_id, read_at)
                            .await
                        {
                            warn!(user = %user.id, room = %room_id, "last-read update failed: {err}");
                        }
                        self.channels
                            .broadcast(
                                room_id,
                                &ServerEvent::ReadReceipt {
                                    room_id,
                                    user_id: user.id,
                                    message_id: message_id
                                        .map(|m| m.to_string())
                                        .unwrap_or_else(|| "latest".to_string()),
                                    read_at,
                                },
                            )
                            .await;
                    }
                    Ok(false) => Self::send_error(tx, "forbidden", "not a member of this room"),
                    Err(err) => {
                        error!(room = %room_id, "membership check failed: {err}");
                        Self::send_error(tx, "internal", "internal server error");
                    }
                }
            }
            ClientEvent::Pong => {
                if let Ok(mut at) = last_pong.lock() {
                    *at = Instant::now();
                }
                if let Err(err) = self.presence.heartbeat(user.id).await {
                    warn!(user = %user.id, "presence heartbeat failed: {err}");
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// `typing{true}` schedules an automatic `typing{false}` unless a newer
    /// typing event supersedes it first.
    fn schedule_typing_clear(self: &Arc<Self>, room_id: RoomId, user_id: UserId, is_typing: bool) {
        let mut timers = self.typing.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = timers.remove(&(room_id, user_id)) {
            handle.abort();
        }
        if is_typing {
            let gateway = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(TYPING_CLEAR_AFTER).await;
                gateway
                    .channels
                    .broadcast(
                        room_id,
                        &ServerEvent::Typing { room_id, user_id, is_typing: false },
                    )
                    .await;
                let mut timers = gateway.typing.lock().unwrap_or_else(|e| e.into_inner());
                timers.remove(&(room_id, user_id));
            });
            timers.insert((room_id, user_id), handle);
        }
    }
}

#[async_trait]
impl FanoutSink for ChatGateway {
    async fn emit_message_updated(&self, room_id: RoomId, message: MessageView) {
        self.broadcast_message_updated(room_id, message).await;
    }
}

/// `/chat` upgrade handler: rate-limit the IP, authenticate the bearer token
/// (header or `?token=`), then hand the socket to the gateway.
pub async fn chat_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SocketQuery>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let decision = state
        .limiter
        .check(ratelimit::WEBSOCKET_IP, &addr.ip().to_string())
        .await;
    if !decision.allowed {
        return ApiError::RateLimited { retry_after: decision.retry_after_secs }.into_response();
    }

    let token = match bearer_token(&headers).or(query.token) {
        Some(token) => token,
        None => return ApiError::Unauthorized("missing bearer token".to_string()).into_response(),
    };

    let claims = match state.tokens.validate_access(&token).await {
        Ok(claims) => claims,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let user = match state.db.get_user_by_id(claims.user_id).await {
        Ok(Some(user)) if user.is_active => user,
        Ok(_) => return ApiError::Unauthorized("account unavailable".to_string()).into_response(),
        Err(err) => return ApiError::from(err).into_response(),
    };

    let gateway = Arc::clone(&state.gateway);
    ws.on_upgrade(move |socket| gateway.handle_socket(socket, user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{EventPublisher, InboundMessage, ModeratedMessage, PersistedMessage};
    use crate::database::test_support::*;
    use crate::errors::BrokerError;
    use crate::kv::MemoryStore;
    use crate::models::{MemberRole, RoomType};
    use crate::services::room::CreateRoomInput;
    use crate::services::HotMessageCache;

    struct NullPublisher;

    #[async_trait]
    impl EventPublisher for NullPublisher {
        async fn publish_inbound(&self, _p: &InboundMessage) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish_moderated(&self, _p: &ModeratedMessage) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish_persisted(&self, _p: &PersistedMessage) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    struct Fixture {
        gateway: Arc<ChatGateway>,
        user: User,
        outsider: User,
        room: crate::models::Room,
    }

    async fn fixture() -> Fixture {
        let db = memory_db().await;
        let store = Arc::new(MemoryStore::new());
        let rooms = Arc::new(RoomService::new(db.clone()));
        let limiter = Arc::new(SlidingWindowLimiter::new(store.clone()));
        let presence = Arc::new(PresenceRegistry::new(store.clone()));
        let messages = Arc::new(MessageService::new(
            db.clone(),
            rooms.clone(),
            limiter.clone(),
            Arc::new(HotMessageCache::new(store)),
            Arc::new(NullPublisher),
        ));

        let user = test_user("u@example.com");
        let outsider = test_user("x@example.com");
        db.create_user(&user).await.unwrap();
        db.create_user(&outsider).await.unwrap();

        let room = rooms
            .create(
                CreateRoomInput {
                    name: "general".to_string(),
                    room_type: RoomType::Channel,
                    is_private: false,
                },
                &user,
            )
            .await
            .unwrap();
        assert_eq!(rooms.role_of(room.id, user.id).await.unwrap(), Some(MemberRole::Owner));

        let gateway = ChatGateway::new(presence, limiter, db, rooms, messages);
        Fixture { gateway, user, outsider, room }
    }

    fn socket() -> (SocketSender, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    async fn drive(
        f: &Fixture,
        user: &User,
        connection_id: ConnectionId,
        tx: &SocketSender,
        event: ClientEvent,
    ) -> ControlFlow<()> {
        let last_pong = Arc::new(Mutex::new(Instant::now()));
        f.gateway
            .handle_client_event(user, connection_id, tx, &last_pong, event)
            .await
    }

    #[tokio::test]
    async fn join_room_announces_presence() {
        let f = fixture().await;
        let (tx, mut rx) = socket();
        let connection = ConnectionId::new();

        let flow = drive(&f, &f.user, connection, &tx, ClientEvent::JoinRoom { room_id: f.room.id }).await;
        assert!(flow.is_continue());

        let frame = rx.recv().await.unwrap();
        assert!(frame.contains(r#""event":"presence""#));
        assert!(frame.contains(r#""status":"online""#));
    }

    #[tokio::test]
    async fn outsiders_get_an_error_event_on_join() {
        let f = fixture().await;
        let (tx, mut rx) = socket();

        drive(&f, &f.outsider, ConnectionId::new(), &tx, ClientEvent::JoinRoom { room_id: f.room.id })
            .await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains(r#""event":"error""#));
        assert!(frame.contains("forbidden"));
    }

    #[tokio::test]
    async fn send_message_broadcasts_to_the_channel() {
        let f = fixture().await;
        let (tx, mut rx) = socket();
        let connection = ConnectionId::new();

        drive(&f, &f.user, connection, &tx, ClientEvent::JoinRoom { room_id: f.room.id }).await;
        rx.recv().await.unwrap(); // presence

        drive(
            &f,
            &f.user,
            connection,
            &tx,
            ClientEvent::SendMessage { room_id: f.room.id, body: "hello".to_string() },
        )
        .await;

        let frame = rx.recv().await.unwrap();
        assert!(frame.contains(r#""event":"message_created""#));
        assert!(frame.contains("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn typing_auto_clears_after_the_timeout() {
        let f = fixture().await;
        let (tx, mut rx) = socket();
        let connection = ConnectionId::new();

        drive(&f, &f.user, connection, &tx, ClientEvent::JoinRoom { room_id: f.room.id }).await;
        rx.recv().await.unwrap(); // presence

        drive(
            &f,
            &f.user,
            connection,
            &tx,
            ClientEvent::Typing { room_id: f.room.id, is_typing: true },
        )
        .await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains(r#""isTyping":true"#));

        // The scheduled clear fires once the timeout elapses.
        tokio::time::sleep(TYPING_CLEAR_AFTER + Duration::from_millis(100)).await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains(r#""isTyping":false"#));
    }

    #[tokio::test(start_paused = true)]
    async fn typing_false_cancels_the_pending_clear() {
        let f = fixture().await;
        let (tx, mut rx) = socket();
        let connection = ConnectionId::new();

        drive(&f, &f.user, connection, &tx, ClientEvent::JoinRoom { room_id: f.room.id }).await;
        rx.recv().await.unwrap();

        drive(
            &f,
            &f.user,
            connection,
            &tx,
            ClientEvent::Typing { room_id: f.room.id, is_typing: true },
        )
        .await;
        rx.recv().await.unwrap(); // typing true

        drive(
            &f,
            &f.user,
            connection,
            &tx,
            ClientEvent::Typing { room_id: f.room.id, is_typing: false },
        )
        .await;
        rx.recv().await.unwrap(); // explicit typing false

        tokio::time::sleep(TYPING_CLEAR_AFTER + Duration::from_millis(100)).await;
        // No further auto-clear arrives.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_receipt_defaults_to_latest() {
        let f = fixture().await;
        let (tx, mut rx) = socket();
        let connection = ConnectionId::new();

        drive(&f, &f.user, connection, &tx, ClientEvent::JoinRoom { room_id: f.room.id }).await;
        rx.recv().await.unwrap();

        drive(
            &f,
            &f.user,
            connection,
            &tx,
            ClientEvent::ReadReceipt { room_id: f.room.id, message_id: None },
        )
        .await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains(r#""event":"read_receipt""#));
        assert!(frame.contains(r#""messageId":"latest""#));
    }

    #[tokio::test]
    async fn fanout_sink_emits_message_updated() {
        let f = fixture().await;
        let (tx, mut rx) = socket();
        drive(&f, &f.user, ConnectionId::new(), &tx, ClientEvent::JoinRoom { room_id: f.room.id })
            .await;
        rx.recv().await.unwrap();

        // Sends through the service alone do not touch the channel; the
        // pipeline drives fan-out through the sink.
        let view = f
            .gateway
            .messages
            .send(f.room.id, "hello", &f.user, None)
            .await
            .unwrap();

        let sink: &dyn FanoutSink = f.gateway.as_ref();
        sink.emit_message_updated(f.room.id, view).await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains(r#""event":"message_updated""#));
    }
}
