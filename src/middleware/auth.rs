use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};

use crate::errors::ApiError;
use crate::models::User;
use crate::ratelimit;
use crate::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Authenticated principal for HTTP handlers.
///
/// Validates the bearer token (signature, expiry, both denylists), loads the
/// account, and admits the request against the per-user API quota. Handlers
/// receive the full user as their first argument instead of re-reading
/// request state.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let claims = state.tokens.validate_access(&token).await?;

        let user = state
            .db
            .get_user_by_id(claims.user_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("account unavailable".to_string()))?;
        if !user.is_active {
            return Err(ApiError::Unauthorized("account is deactivated".to_string()));
        }

        let decision = state
            .limiter
            .check(ratelimit::API_USER, &user.id.to_string())
            .await;
        if !decision.allowed {
            return Err(ApiError::RateLimited {
                retry_after: decision.retry_after_secs,
            });
        }

        Ok(CurrentUser(user))
    }
}

/// Admin-gated principal; everything `CurrentUser` does plus a role check.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::Forbidden("admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}
