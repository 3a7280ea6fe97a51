use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::{MessageId, RoomId, UserId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("store value malformed: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("missing bearer token")]
    TokenMissing,

    #[error("invalid or expired token")]
    TokenInvalid,

    #[error("token has been revoked")]
    TokenRevoked,

    #[error("email already registered: {email}")]
    EmailExists { email: String },

    #[error("invalid email format: {email}")]
    InvalidEmail { email: String },

    #[error("password too weak")]
    WeakPassword,

    #[error("invalid display name: {reason}")]
    InvalidName { reason: String },

    #[error("user not found")]
    UserNotFound,

    #[error("account is deactivated")]
    UserInactive,

    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("token handling failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("keyed store failed: {0}")]
    Store(#[from] StoreError),

    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("room not found: {room_id}")]
    NotFound { room_id: RoomId },

    #[error("user {user_id} is not a member of room {room_id}")]
    NotAMember { user_id: UserId, room_id: RoomId },

    #[error("user {user_id} is already a member of room {room_id}")]
    AlreadyMember { user_id: UserId, room_id: RoomId },

    #[error("operation requires a higher role: {reason}")]
    Forbidden { reason: String },

    #[error("a room must keep at least one owner")]
    SoleOwner,

    #[error("target user is not a member of the room")]
    TargetNotMember,

    #[error("target user not found")]
    UserNotFound,

    #[error("invalid room name: {reason}")]
    InvalidName { reason: String },

    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("message not found: {message_id}")]
    NotFound { message_id: MessageId },

    #[error("only the sender may modify a message")]
    NotSender,

    #[error("invalid message body: {reason}")]
    InvalidBody { reason: String },

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("payload failed {topic} schema validation: {reason}")]
    Schema { topic: &'static str, reason: String },

    #[error("kafka operation failed: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("analyzer request failed: {0}")]
    Analyzer(#[from] reqwest::Error),
}

/// Boundary error for the HTTP surface. Only this type knows the §-style
/// kind→status mapping; services speak the domain enums above.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_failed",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!("internal error: {detail}");
        }

        let message = match &self {
            // Never leak internals to the client.
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        let mut response = (self.status(), body).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials
            | AuthError::TokenMissing
            | AuthError::TokenInvalid
            | AuthError::TokenRevoked
            | AuthError::UserInactive
            | AuthError::Jwt(_) => ApiError::Unauthorized(err.to_string()),
            AuthError::UserNotFound => ApiError::NotFound(err.to_string()),
            AuthError::EmailExists { .. } => ApiError::Conflict(err.to_string()),
            AuthError::InvalidEmail { .. }
            | AuthError::WeakPassword
            | AuthError::InvalidName { .. } => ApiError::Validation(err.to_string()),
            AuthError::PasswordHash(_) | AuthError::Store(_) | AuthError::Database(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<RoomError> for ApiError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::NotFound { .. } | RoomError::UserNotFound => {
                ApiError::NotFound(err.to_string())
            }
            RoomError::NotAMember { .. }
            | RoomError::Forbidden { .. }
            | RoomError::SoleOwner => ApiError::Forbidden(err.to_string()),
            RoomError::AlreadyMember { .. } => ApiError::Conflict(err.to_string()),
            RoomError::TargetNotMember | RoomError::InvalidName { .. } => {
                ApiError::Validation(err.to_string())
            }
            RoomError::Database(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::RateLimited { retry_after } => ApiError::RateLimited { retry_after },
            MessageError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            MessageError::NotSender => ApiError::Forbidden(err.to_string()),
            MessageError::InvalidBody { .. } => ApiError::Validation(err.to_string()),
            MessageError::Room(room_err) => room_err.into(),
            MessageError::Database(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
