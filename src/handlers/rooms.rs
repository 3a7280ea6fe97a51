use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::middleware::CurrentUser;
use crate::models::{MemberRole, Membership, Paginated, Room, RoomId, UserId};
use crate::services::CreateRoomInput;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoomRequest {
    pub name: Option<String>,
    pub is_private: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: MemberRole,
}

pub async fn create_room(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateRoomInput>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let room = state.rooms.create(input, &user).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Paginated<Room>>, ApiError> {
    let page = state
        .rooms
        .list_for_user(user.id, query.page.unwrap_or(1), query.limit.unwrap_or(20))
        .await?;
    Ok(Json(page))
}

pub async fn get_room(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Room>, ApiError> {
    Ok(Json(state.rooms.get_for_member(RoomId(id), user.id).await?))
}

pub async fn update_room(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRoomRequest>,
) -> Result<Json<Room>, ApiError> {
    let room = state
        .rooms
        .update(RoomId(id), user.id, req.name.as_deref(), req.is_private)
        .await?;
    Ok(Json(room))
}

pub async fn list_members(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Membership>>, ApiError> {
    Ok(Json(state.rooms.members(RoomId(id), user.id).await?))
}

pub async fn add_member(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<Membership>), ApiError> {
    let membership = state
        .rooms
        .add_member(RoomId(id), user.id, UserId(req.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

/// DELETE /rooms/:id/members — the caller leaves the room.
pub async fn leave_room(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.rooms.remove_member(RoomId(id), user.id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_member(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .rooms
        .remove_member(RoomId(id), user.id, UserId(user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_member_role(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<Membership>, ApiError> {
    let membership = state
        .rooms
        .update_member_role(RoomId(id), user.id, UserId(user_id), req.role)
        .await?;
    Ok(Json(membership))
}
