use std::sync::Arc;
use std::time::Duration;

use relaychat::config::JwtConfig;
use relaychat::database::Database;
use relaychat::errors::AuthError;
use relaychat::kv::MemoryStore;
use relaychat::services::{AuthService, TokenService};

fn jwt_config() -> JwtConfig {
    JwtConfig {
        access_secret: "integration-access-secret".to_string(),
        refresh_secret: "integration-refresh-secret".to_string(),
        access_ttl: Duration::from_secs(900),
        refresh_ttl: Duration::from_secs(7 * 24 * 3600),
    }
}

async fn stack() -> (AuthService, Arc<TokenService>) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let tokens = Arc::new(TokenService::new(&jwt_config(), Arc::new(MemoryStore::new())));
    (AuthService::new(db, tokens.clone()), tokens)
}

#[tokio::test]
async fn register_login_logout_round_trip() {
    let (auth, _tokens) = stack().await;

    let registered = auth.register("a@x.io", "Passw0rd!", "A").await.unwrap();
    assert_eq!(registered.user.email, "a@x.io");
    assert!(!registered.tokens.access_token.is_empty());

    let logged_in = auth.login("a@x.io", "Passw0rd!").await.unwrap();
    let refresh_token = logged_in.tokens.refresh_token.clone();

    auth.logout(&refresh_token).await.unwrap();

    // A logged-out refresh token can never mint a new session.
    assert!(matches!(
        auth.refresh(&refresh_token).await,
        Err(AuthError::TokenRevoked)
    ));
}

#[tokio::test]
async fn refresh_rotation_blacklists_the_old_token() {
    let (auth, tokens) = stack().await;

    let session = auth.register("b@x.io", "Passw0rd!", "B").await.unwrap();
    let original = session.tokens.refresh_token.clone();

    let rotated = auth.refresh(&original).await.unwrap();
    assert_ne!(rotated.tokens.refresh_token, original);

    // Blacklisted until its natural expiry, and refusal is stable.
    assert!(tokens.is_blacklisted(&original).await.unwrap());
    assert!(matches!(auth.refresh(&original).await, Err(AuthError::TokenRevoked)));
    assert!(auth.refresh(&rotated.tokens.refresh_token).await.is_ok());
}

#[tokio::test]
async fn access_tokens_die_with_a_user_wide_cutoff() {
    let (auth, tokens) = stack().await;

    let session = auth.register("c@x.io", "Passw0rd!", "C").await.unwrap();
    let access = session.tokens.access_token.clone();
    assert!(tokens.validate_access(&access).await.is_ok());

    // Tokens are stamped with second-resolution iat; make sure the cutoff
    // lands strictly after it.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    tokens.blacklist_user(session.user.id).await.unwrap();

    assert!(matches!(
        tokens.validate_access(&access).await,
        Err(AuthError::TokenRevoked)
    ));
}
