use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::JwtConfig;
use crate::errors::AuthError;
use crate::kv::KeyValueStore;
use crate::models::{User, UserId, UserRole};

/// Canonical denylist prefixes. Revoked tokens live under the token prefix
/// until their natural expiry; the user prefix holds an "all tokens issued
/// before this instant are dead" cutoff.
const TOKEN_DENYLIST_PREFIX: &str = "blacklist:token:";
const USER_DENYLIST_PREFIX: &str = "blacklist:user:";

const USER_CUTOFF_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "_id")]
    pub user_id: UserId,
    pub email: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and validates the access/refresh token pair and owns the
/// store-backed denylist.
pub struct TokenService {
    access_secret: String,
    refresh_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store: Arc<dyn KeyValueStore>,
}

impl TokenService {
    pub fn new(config: &JwtConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            access_secret: config.access_secret.clone(),
            refresh_secret: config.refresh_secret.clone(),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            store,
        }
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.sign(user, &self.access_secret, self.access_ttl)?,
            refresh_token: self.sign(user, &self.refresh_secret, self.refresh_ttl)?,
        })
    }

    fn sign(&self, user: &User, secret: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            iat: now,
            exp: now + ttl.as_secs() as i64,
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        Self::verify(token, &self.access_secret)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        Self::verify(token, &self.refresh_secret)
    }

    fn verify(token: &str, secret: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AuthError::TokenInvalid)?;
        Ok(data.claims)
    }

    /// Reads claims without checking the signature. Only used to recover
    /// `exp` when denylisting a token we did not necessarily issue with the
    /// secret at hand.
    fn decode_unverified(token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|_| AuthError::TokenInvalid)?;
        Ok(data.claims)
    }

    /// Denylist a token until its natural expiry. Already-expired tokens are
    /// not stored; they fail verification anyway.
    pub async fn blacklist(&self, token: &str) -> Result<(), AuthError> {
        let claims = Self::decode_unverified(token)?;
        let remaining = claims.exp - Utc::now().timestamp();
        if remaining > 0 {
            self.store
                .set(
                    &format!("{TOKEN_DENYLIST_PREFIX}{token}"),
                    "1",
                    Some(Duration::from_secs(remaining as u64)),
                )
                .await?;
        }
        Ok(())
    }

    pub async fn is_blacklisted(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self
            .store
            .exists(&format!("{TOKEN_DENYLIST_PREFIX}{token}"))
            .await?)
    }

    /// Invalidate every token the user holds that was issued before now.
    pub async fn blacklist_user(&self, user_id: UserId) -> Result<(), AuthError> {
        let marker = json!({ "blacklistedAt": Utc::now().timestamp_millis() });
        self.store
            .set(
                &format!("{USER_DENYLIST_PREFIX}{user_id}"),
                &marker.to_string(),
                Some(USER_CUTOFF_TTL),
            )
            .await?;
        Ok(())
    }

    pub async fn is_user_blacklisted_at(
        &self,
        user_id: UserId,
        iat_ms: i64,
    ) -> Result<bool, AuthError> {
        let raw = self
            .store
            .get(&format!("{USER_DENYLIST_PREFIX}{user_id}"))
            .await?;
        let Some(raw) = raw else { return Ok(false) };

        let cutoff = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| v.get("blacklistedAt").and_then(|at| at.as_i64()));
        Ok(cutoff.is_some_and(|at| iat_ms < at))
    }

    /// Full access-token validation: signature and claims, then both
    /// denylist checks.
    pub async fn validate_access(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.verify_access(token)?;
        if self.is_blacklisted(token).await? {
            return Err(AuthError::TokenRevoked);
        }
        if self
            .is_user_blacklisted_at(claims.user_id, claims.iat * 1000)
            .await?
        {
            return Err(AuthError::TokenRevoked);
        }
        Ok(claims)
    }
}
