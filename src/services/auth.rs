use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::database::Database;
use crate::errors::AuthError;
use crate::models::{User, UserId, UserRole};
use crate::sanitize::sanitize_text;
use crate::services::token::{TokenPair, TokenService};

const NAME_MAX_CHARS: usize = 50;

/// Response shape for register/login/refresh: the token pair flattened next
/// to the user.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: User,
}

pub struct AuthService {
    db: Database,
    tokens: Arc<TokenService>,
}

impl AuthService {
    pub fn new(db: Database, tokens: Arc<TokenService>) -> Self {
        Self { db, tokens }
    }

    fn validate_email(email: &str) -> Result<(), AuthError> {
        let at = email.find('@');
        let valid = matches!(at, Some(idx) if idx > 0 && email[idx + 1..].contains('.'));
        if valid {
            Ok(())
        } else {
            Err(AuthError::InvalidEmail { email: email.to_string() })
        }
    }

    fn validate_password(password: &str) -> Result<(), AuthError> {
        if password.len() < 8 {
            return Err(AuthError::WeakPassword);
        }
        Ok(())
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthSession, AuthError> {
        let email = email.trim().to_lowercase();
        Self::validate_email(&email)?;
        Self::validate_password(password)?;

        let name = sanitize_text(name);
        if name.is_empty() || name.chars().count() > NAME_MAX_CHARS {
            return Err(AuthError::InvalidName {
                reason: format!("must be 1-{NAME_MAX_CHARS} characters"),
            });
        }

        if self.db.get_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailExists { email });
        }

        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            email,
            name,
            password_hash: hash(password, DEFAULT_COST)?,
            role: UserRole::User,
            is_active: true,
            avatar_url: None,
            last_login_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        self.db.create_user(&user).await?;

        let tokens = self.tokens.issue_pair(&user)?;
        Ok(AuthSession { tokens, user })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = email.trim().to_lowercase();
        let user = self
            .db
            .get_user_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        let now = Utc::now();
        self.db.set_last_login(user.id, now).await?;
        let tokens = self.tokens.issue_pair(&user)?;
        Ok(AuthSession {
            tokens,
            user: User { last_login_at: Some(now), ..user },
        })
    }

    /// Rotate a refresh token: the presented token must verify and not be
    /// denylisted; it is denylisted on success so it can never be replayed.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;
        if self.tokens.is_blacklisted(refresh_token).await? {
            return Err(AuthError::TokenRevoked);
        }
        if self
            .tokens
            .is_user_blacklisted_at(claims.user_id, claims.iat * 1000)
            .await?
        {
            return Err(AuthError::TokenRevoked);
        }

        let user = self
            .db
            .get_user_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        self.tokens.blacklist(refresh_token).await?;
        let tokens = self.tokens.issue_pair(&user)?;
        Ok(AuthSession { tokens, user })
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.tokens.blacklist(refresh_token).await
    }
}
