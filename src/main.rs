use anyhow::{Context, Result};
use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use relaychat::broker::{self, EventProducer};
use relaychat::config::Config;
use relaychat::database::Database;
use relaychat::gateway::ChatGateway;
use relaychat::handlers;
use relaychat::kv::{KeyValueStore, RedisStore};
use relaychat::logging;
use relaychat::pipeline::{AnalyzerClient, PipelineProcessor};
use relaychat::ratelimit::SlidingWindowLimiter;
use relaychat::services::{
    AuthService, HotMessageCache, MessageService, PresenceRegistry, RoomService, TokenService,
    UserService,
};
use relaychat::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    logging::init(&config);
    info!("starting relaychat on {}", config.server.bind_address);

    let db = Database::connect(&config.database.database_url)
        .await
        .context("failed to open the database")?;
    let store: Arc<dyn KeyValueStore> = Arc::new(
        RedisStore::connect(&config.redis.redis_url)
            .await
            .context("failed to connect to redis")?,
    );

    let limiter = Arc::new(SlidingWindowLimiter::new(store.clone()));
    let tokens = Arc::new(TokenService::new(&config.jwt, store.clone()));
    let presence = Arc::new(PresenceRegistry::new(store.clone()));
    let cache = Arc::new(HotMessageCache::new(store));

    let producer = Arc::new(
        EventProducer::new(&config.kafka.broker).context("failed to create the kafka producer")?,
    );
    let rooms = Arc::new(RoomService::new(db.clone()));
    let messages = Arc::new(MessageService::new(
        db.clone(),
        rooms.clone(),
        limiter.clone(),
        cache,
        producer.clone(),
    ));
    let auth_service = Arc::new(AuthService::new(db.clone(), tokens.clone()));
    let users = Arc::new(UserService::new(db.clone()));

    let gateway = ChatGateway::new(
        presence,
        limiter.clone(),
        db.clone(),
        rooms.clone(),
        messages.clone(),
    );

    // Pipeline consumers: inbound → moderated → persisted. The gateway is
    // the fan-out sink, injected to keep the dependency chain acyclic.
    let analyzer =
        AnalyzerClient::new(&config.analyzer).context("failed to build the analyzer client")?;
    let processor = Arc::new(PipelineProcessor::new(
        db.clone(),
        producer,
        analyzer,
        gateway.clone(),
    ));
    let inbound = broker::build_consumer(
        &config.kafka.broker,
        &config.kafka.consumer_group,
        broker::TOPIC_INBOUND,
    )
    .context("failed to subscribe to the inbound topic")?;
    let moderated = broker::build_consumer(
        &config.kafka.broker,
        &config.kafka.consumer_group,
        broker::TOPIC_MODERATED,
    )
    .context("failed to subscribe to the moderated topic")?;
    tokio::spawn(processor.clone().run_inbound(inbound));
    tokio::spawn(processor.run_moderated(moderated));

    let state = AppState {
        db,
        tokens,
        limiter,
        auth_service,
        users,
        rooms,
        messages,
        gateway,
    };

    let app = handlers::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config)),
    );

    axum::Server::bind(&config.server.bind_address)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("relaychat stopped");
    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install the shutdown signal handler");
    }
    info!("shutdown signal received");
}
