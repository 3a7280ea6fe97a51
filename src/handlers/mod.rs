pub mod auth;
pub mod messages;
pub mod rooms;
pub mod users;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use serde_json::json;

use crate::gateway;
use crate::AppState;

pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(json!({ "status": "ok" }))
}

/// Full route table: REST surface under `/api`, the realtime socket at
/// `/chat`, and liveness at `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", get(gateway::chat_handler))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/profile", get(auth::profile))
        .route("/api/users/me", get(users::me).patch(users::update_me))
        .route(
            "/api/users/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/api/users/:id/role", patch(users::set_role))
        .route("/api/users/:id/activate", patch(users::activate))
        .route("/api/users/:id/deactivate", patch(users::deactivate))
        .route("/api/rooms", post(rooms::create_room).get(rooms::list_rooms))
        .route("/api/rooms/:id", get(rooms::get_room).patch(rooms::update_room))
        .route(
            "/api/rooms/:id/members",
            post(rooms::add_member)
                .get(rooms::list_members)
                .delete(rooms::leave_room),
        )
        .route("/api/rooms/:id/members/:user_id", delete(rooms::remove_member))
        .route(
            "/api/rooms/:id/members/:user_id/role",
            patch(rooms::update_member_role),
        )
        .route(
            "/api/rooms/:id/messages",
            post(messages::send_message).get(messages::list_messages),
        )
        .route(
            "/api/messages/:id",
            get(messages::get_message)
                .patch(messages::update_message)
                .delete(messages::delete_message),
        )
        .with_state(state)
}
