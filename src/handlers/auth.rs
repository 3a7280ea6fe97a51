use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::middleware::CurrentUser;
use crate::models::User;
use crate::services::AuthSession;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthSession>), ApiError> {
    let session = state
        .auth_service
        .register(&req.email, &req.password, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthSession>, ApiError> {
    let session = state.auth_service.login(&req.email, &req.password).await?;
    Ok(Json(session))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthSession>, ApiError> {
    let session = state.auth_service.refresh(&req.refresh_token).await?;
    Ok(Json(session))
}

pub async fn logout(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<Value>, ApiError> {
    state.auth_service.logout(&req.refresh_token).await?;
    Ok(Json(json!({ "message": "logged out" })))
}

pub async fn profile(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
