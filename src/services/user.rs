use crate::database::Database;
use crate::errors::AuthError;
use crate::models::{User, UserId, UserRole};
use crate::sanitize::sanitize_text;

/// Admin and self-service account operations. Authorization (admin vs self)
/// is enforced at the handler boundary; this service assumes the caller is
/// allowed.
pub struct UserService {
    db: Database,
}

impl UserService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: UserId) -> Result<User, AuthError> {
        self.db
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    pub async fn update_profile(
        &self,
        user_id: UserId,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User, AuthError> {
        let name = name.map(sanitize_text);
        if let Some(name) = &name {
            if name.is_empty() {
                return Err(AuthError::InvalidName {
                    reason: "must not be empty".to_string(),
                });
            }
        }

        self.db
            .update_user_profile(user_id, name.as_deref(), avatar_url)
            .await?;
        self.get(user_id).await
    }

    pub async fn set_role(&self, user_id: UserId, role: UserRole) -> Result<User, AuthError> {
        if !self.db.set_user_role(user_id, role).await? {
            return Err(AuthError::UserNotFound);
        }
        self.get(user_id).await
    }

    pub async fn set_active(&self, user_id: UserId, active: bool) -> Result<User, AuthError> {
        if !self.db.set_user_active(user_id, active).await? {
            return Err(AuthError::UserNotFound);
        }
        self.get(user_id).await
    }

    pub async fn delete(&self, user_id: UserId) -> Result<(), AuthError> {
        if !self.db.delete_user(user_id).await? {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }
}
