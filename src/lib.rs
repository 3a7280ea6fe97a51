pub mod broker;
pub mod config;
pub mod database;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod kv;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod ratelimit;
pub mod sanitize;
pub mod services;

use std::sync::Arc;

use crate::database::Database;
use crate::gateway::ChatGateway;
use crate::ratelimit::SlidingWindowLimiter;
use crate::services::{AuthService, MessageService, RoomService, TokenService, UserService};

/// Shared handler state. Every field is cheap to clone; services are behind
/// `Arc` and the database wraps a pool.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub tokens: Arc<TokenService>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub auth_service: Arc<AuthService>,
    pub users: Arc<UserService>,
    pub rooms: Arc<RoomService>,
    pub messages: Arc<MessageService>,
    pub gateway: Arc<ChatGateway>,
}
