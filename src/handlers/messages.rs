use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::middleware::CurrentUser;
use crate::models::{MessageId, MessageView, Paginated, RoomId};
use crate::services::HistoryQuery;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageBodyRequest {
    pub body: String,
}

pub async fn send_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(room_id): Path<Uuid>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<MessageBodyRequest>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let room_id = RoomId(room_id);
    let view = state
        .messages
        .send(room_id, &req.body, &user, Some(addr.ip()))
        .await?;

    state
        .gateway
        .broadcast_message_created(room_id, view.clone())
        .await;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Paginated<MessageView>>, ApiError> {
    let page = state.messages.list(RoomId(room_id), query, &user).await?;
    Ok(Json(page))
}

pub async fn get_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageView>, ApiError> {
    Ok(Json(state.messages.get(MessageId(id), &user).await?))
}

pub async fn update_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageBodyRequest>,
) -> Result<Json<MessageView>, ApiError> {
    let view = state.messages.update(MessageId(id), &req.body, &user).await?;

    state
        .gateway
        .broadcast_message_updated(view.room_id, view.clone())
        .await;
    Ok(Json(view))
}

pub async fn delete_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.messages.delete(MessageId(id), &user).await?;

    state
        .gateway
        .broadcast_message_deleted(deleted.room_id, deleted.id)
        .await;
    Ok(StatusCode::NO_CONTENT)
}
