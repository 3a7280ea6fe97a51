use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::models::{
    MemberRole, Membership, Message, MessageId, ModerationMeta, Room, RoomId, RoomType, Sentiment,
    User, UserId, UserRole,
};

/// Database of record for users, rooms, memberships and messages.
///
/// Ids are stored as UUID strings and mapped manually; the schema is applied
/// on startup with idempotent migrations.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn decode_err(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

fn parse_id<T: FromStr<Err = uuid::Error>>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: uuid::Error| decode_err(column, e))
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized value: {0}")]
struct BadEnum(String);

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        // A :memory: database must stay on a single connection or every
        // pooled connection sees its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'admin')),
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                avatar_url TEXT,
                last_login_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                room_type TEXT NOT NULL CHECK (room_type IN ('dm', 'channel')),
                is_private BOOLEAN NOT NULL DEFAULT FALSE,
                created_by TEXT NOT NULL REFERENCES users(id),
                members_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memberships (
                room_id TEXT NOT NULL REFERENCES rooms(id),
                user_id TEXT NOT NULL REFERENCES users(id),
                role TEXT NOT NULL CHECK (role IN ('owner', 'moderator', 'member')),
                joined_at DATETIME NOT NULL,
                last_read_message TEXT,
                last_seen_at DATETIME,
                PRIMARY KEY (room_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                room_id TEXT NOT NULL REFERENCES rooms(id),
                sender_id TEXT NOT NULL REFERENCES users(id),
                body TEXT NOT NULL,
                sentiment TEXT NOT NULL CHECK (sentiment IN ('positive', 'negative', 'neutral')),
                flagged BOOLEAN NOT NULL DEFAULT FALSE,
                reasons TEXT NOT NULL DEFAULT '[]',
                edited_at DATETIME,
                deleted_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_room_created
             ON messages (room_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships (user_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// User operations
impl Database {
    pub async fn create_user(&self, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, password_hash, role, is_active, avatar_url,
                               last_login_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(&user.avatar_url)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user_by_id(&self, user_id: UserId) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn update_user_profile(
        &self,
        user_id: UserId,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET name = COALESCE(?, name),
                avatar_url = COALESCE(?, avatar_url),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(avatar_url)
        .bind(Utc::now())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_user_role(&self, user_id: UserId, role: UserRole) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(Utc::now())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_user_active(&self, user_id: UserId, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_last_login(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(at)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_user(&self, user_id: UserId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// Room and membership operations
impl Database {
    /// Inserts the room together with its owner membership; `members_count`
    /// starts at 1 so the count invariant holds from the first row.
    pub async fn create_room_with_owner(
        &self,
        room: &Room,
        owner: &Membership,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO rooms (id, name, room_type, is_private, created_by, members_count,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(room.id.to_string())
        .bind(&room.name)
        .bind(room.room_type.as_str())
        .bind(room.is_private)
        .bind(room.created_by.to_string())
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&mut tx)
        .await?;

        insert_membership(&mut tx, owner).await?;
        tx.commit().await
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM rooms WHERE id = ?")
            .bind(room_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| room_from_row(&r)).transpose()
    }

    pub async fn update_room(
        &self,
        room_id: RoomId,
        name: Option<&str>,
        is_private: Option<bool>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE rooms
            SET name = COALESCE(?, name),
                is_private = COALESCE(?, is_private),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(is_private)
        .bind(Utc::now())
        .bind(room_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_rooms_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Room>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM rooms r
            JOIN memberships m ON m.room_id = r.id
            WHERE m.user_id = ?
            ORDER BY r.created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(room_from_row).collect()
    }

    pub async fn count_rooms_for_user(&self, user_id: UserId) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM memberships WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        row.try_get("n")
    }

    pub async fn room_ids_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, sqlx::Error> {
        let rows = sqlx::query("SELECT room_id FROM memberships WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| parse_id(r, "room_id")).collect()
    }

    pub async fn get_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Membership>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM memberships WHERE room_id = ? AND user_id = ?")
            .bind(room_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| membership_from_row(&r)).transpose()
    }

    /// Adds the membership and bumps the room's member count in one
    /// transaction.
    pub async fn add_member(&self, membership: &Membership) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        insert_membership(&mut tx, membership).await?;
        sqlx::query("UPDATE rooms SET members_count = members_count + 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(membership.room_id.to_string())
            .execute(&mut tx)
            .await?;
        tx.commit().await
    }

    /// Removes the membership and decrements the count; the decrement only
    /// happens when a row was actually deleted.
    pub async fn remove_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM memberships WHERE room_id = ? AND user_id = ?")
            .bind(room_id.to_string())
            .bind(user_id.to_string())
            .execute(&mut tx)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            sqlx::query(
                "UPDATE rooms SET members_count = members_count - 1, updated_at = ? WHERE id = ?",
            )
            .bind(Utc::now())
            .bind(room_id.to_string())
            .execute(&mut tx)
            .await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn update_member_role(
        &self,
        room_id: RoomId,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE memberships SET role = ? WHERE room_id = ? AND user_id = ?")
            .bind(role.as_str())
            .bind(room_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_members(&self, room_id: RoomId) -> Result<Vec<Membership>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM memberships WHERE room_id = ? ORDER BY joined_at ASC")
            .bind(room_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(membership_from_row).collect()
    }

    pub async fn count_owners(&self, room_id: RoomId) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM memberships WHERE room_id = ? AND role = 'owner'",
        )
        .bind(room_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        row.try_get("n")
    }

    pub async fn count_members(&self, room_id: RoomId) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM memberships WHERE room_id = ?")
            .bind(room_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        row.try_get("n")
    }

    pub async fn update_last_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        message_id: Option<MessageId>,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE memberships
            SET last_read_message = COALESCE(?, last_read_message), last_seen_at = ?
            WHERE room_id = ? AND user_id = ?
            "#,
        )
        .bind(message_id.map(|m| m.to_string()))
        .bind(at)
        .bind(room_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// Message operations
impl Database {
    pub async fn insert_message(&self, message: &Message) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, room_id, sender_id, body, sentiment, flagged, reasons,
                                  edited_at, deleted_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.id.to_string())
        .bind(message.room_id.to_string())
        .bind(message.sender_id.to_string())
        .bind(&message.body)
        .bind(message.moderation.sentiment.as_str())
        .bind(message.moderation.flagged)
        .bind(serde_json::to_string(&message.moderation.reasons).unwrap_or_else(|_| "[]".into()))
        .bind(message.edited_at)
        .bind(message.deleted_at)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, message_id: MessageId) -> Result<Option<Message>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(message_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| message_from_row(&r)).transpose()
    }

    /// Live-message history page, newest first. `before` bounds the page to
    /// rows strictly older than the given instant (cursor pagination).
    pub async fn list_room_messages(
        &self,
        room_id: RoomId,
        limit: i64,
        offset: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, sqlx::Error> {
        let rows = match before {
            Some(before) => {
                sqlx::query(
                    r#"
                    SELECT * FROM messages
                    WHERE room_id = ? AND deleted_at IS NULL AND created_at < ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(room_id.to_string())
                .bind(before)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM messages
                    WHERE room_id = ? AND deleted_at IS NULL
                    ORDER BY created_at DESC, id DESC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(room_id.to_string())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(message_from_row).collect()
    }

    pub async fn count_room_messages(&self, room_id: RoomId) -> Result<i64, sqlx::Error> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE room_id = ? AND deleted_at IS NULL")
                .bind(room_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        row.try_get("n")
    }

    pub async fn update_message_body(
        &self,
        message_id: MessageId,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE messages SET body = ?, edited_at = ?, updated_at = ? WHERE id = ?")
            .bind(body)
            .bind(edited_at)
            .bind(edited_at)
            .bind(message_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn soft_delete_message(
        &self,
        message_id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE messages SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(message_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Applies the pipeline verdict to the stored message and returns the
    /// refreshed row. Returns `None` when the id is unknown, which callers
    /// treat as a no-op.
    pub async fn update_message_moderation(
        &self,
        message_id: MessageId,
        meta: &ModerationMeta,
    ) -> Result<Option<Message>, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE messages SET sentiment = ?, flagged = ?, reasons = ?, updated_at = ? WHERE id = ?",
        )
        .bind(meta.sentiment.as_str())
        .bind(meta.flagged)
        .bind(serde_json::to_string(&meta.reasons).unwrap_or_else(|_| "[]".into()))
        .bind(Utc::now())
        .bind(message_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_message(message_id).await
    }
}

async fn insert_membership(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    membership: &Membership,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO memberships (room_id, user_id, role, joined_at, last_read_message, last_seen_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(membership.room_id.to_string())
    .bind(membership.user_id.to_string())
    .bind(membership.role.as_str())
    .bind(membership.joined_at)
    .bind(membership.last_read_message.map(|m| m.to_string()))
    .bind(membership.last_seen_at)
    .execute(tx)
    .await?;
    Ok(())
}

fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    let role_raw: String = row.try_get("role")?;
    Ok(User {
        id: parse_id(row, "id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        password_hash: row.try_get("password_hash")?,
        role: UserRole::parse(&role_raw).ok_or_else(|| decode_err("role", BadEnum(role_raw.clone())))?,
        is_active: row.try_get("is_active")?,
        avatar_url: row.try_get("avatar_url")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn room_from_row(row: &SqliteRow) -> Result<Room, sqlx::Error> {
    let type_raw: String = row.try_get("room_type")?;
    Ok(Room {
        id: parse_id(row, "id")?,
        name: row.try_get("name")?,
        room_type: RoomType::parse(&type_raw)
            .ok_or_else(|| decode_err("room_type", BadEnum(type_raw.clone())))?,
        is_private: row.try_get("is_private")?,
        created_by: parse_id(row, "created_by")?,
        members_count: row.try_get("members_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn membership_from_row(row: &SqliteRow) -> Result<Membership, sqlx::Error> {
    let role_raw: String = row.try_get("role")?;
    let last_read: Option<String> = row.try_get("last_read_message")?;
    Ok(Membership {
        room_id: parse_id(row, "room_id")?,
        user_id: parse_id(row, "user_id")?,
        role: MemberRole::parse(&role_raw)
            .ok_or_else(|| decode_err("role", BadEnum(role_raw.clone())))?,
        joined_at: row.try_get("joined_at")?,
        last_read_message: last_read
            .map(|s| s.parse().map_err(|e: uuid::Error| decode_err("last_read_message", e)))
            .transpose()?,
        last_seen_at: row.try_get("last_seen_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, sqlx::Error> {
    let sentiment_raw: String = row.try_get("sentiment")?;
    let reasons_raw: String = row.try_get("reasons")?;
    Ok(Message {
        id: parse_id(row, "id")?,
        room_id: parse_id(row, "room_id")?,
        sender_id: parse_id(row, "sender_id")?,
        body: row.try_get("body")?,
        moderation: ModerationMeta {
            sentiment: Sentiment::parse(&sentiment_raw)
                .ok_or_else(|| decode_err("sentiment", BadEnum(sentiment_raw.clone())))?,
            flagged: row.try_get("flagged")?,
            reasons: serde_json::from_str(&reasons_raw)
                .map_err(|e| decode_err("reasons", e))?,
        },
        edited_at: row.try_get("edited_at")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub async fn memory_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    pub fn test_user(email: &str) -> User {
        let now = Utc::now();
        User {
            id: UserId::new(),
            email: email.to_string(),
            name: email.split('@').next().unwrap_or("user").to_string(),
            password_hash: "$2b$12$test".to_string(),
            role: UserRole::User,
            is_active: true,
            avatar_url: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_room(created_by: UserId) -> Room {
        let now = Utc::now();
        Room {
            id: RoomId::new(),
            name: "general".to_string(),
            room_type: RoomType::Channel,
            is_private: false,
            created_by,
            members_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_membership(room_id: RoomId, user_id: UserId, role: MemberRole) -> Membership {
        Membership {
            room_id,
            user_id,
            role,
            joined_at: Utc::now(),
            last_read_message: None,
            last_seen_at: None,
        }
    }

    pub fn test_message(room_id: RoomId, sender_id: UserId, body: &str) -> Message {
        let now = Utc::now();
        Message {
            id: MessageId::new(),
            room_id,
            sender_id,
            body: body.to_string(),
            moderation: ModerationMeta::default(),
            edited_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn user_round_trip() {
        let db = memory_db().await;
        let user = test_user("a@example.com");
        db.create_user(&user).await.unwrap();

        let loaded = db.get_user_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(loaded.id, user.id);
        assert_eq!(loaded.role, UserRole::User);
        assert!(loaded.is_active);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let db = memory_db().await;
        db.create_user(&test_user("dup@example.com")).await.unwrap();
        assert!(db.create_user(&test_user("dup@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn membership_is_unique_per_room_and_user() {
        let db = memory_db().await;
        let owner = test_user("o@example.com");
        db.create_user(&owner).await.unwrap();
        let room = test_room(owner.id);
        let owner_membership = test_membership(room.id, owner.id, MemberRole::Owner);
        db.create_room_with_owner(&room, &owner_membership).await.unwrap();

        assert!(db.add_member(&owner_membership).await.is_err());
    }

    #[tokio::test]
    async fn members_count_tracks_memberships() {
        let db = memory_db().await;
        let owner = test_user("o@example.com");
        let other = test_user("m@example.com");
        db.create_user(&owner).await.unwrap();
        db.create_user(&other).await.unwrap();

        let room = test_room(owner.id);
        db.create_room_with_owner(&room, &test_membership(room.id, owner.id, MemberRole::Owner))
            .await
            .unwrap();

        db.add_member(&test_membership(room.id, other.id, MemberRole::Member))
            .await
            .unwrap();
        let loaded = db.get_room(room.id).await.unwrap().unwrap();
        assert_eq!(loaded.members_count, 2);
        assert_eq!(loaded.members_count, db.count_members(room.id).await.unwrap());

        assert!(db.remove_member(room.id, other.id).await.unwrap());
        let loaded = db.get_room(room.id).await.unwrap().unwrap();
        assert_eq!(loaded.members_count, 1);
        assert_eq!(loaded.members_count, db.count_members(room.id).await.unwrap());

        // Removing a non-member leaves the count alone.
        assert!(!db.remove_member(room.id, other.id).await.unwrap());
        let loaded = db.get_room(room.id).await.unwrap().unwrap();
        assert_eq!(loaded.members_count, 1);
    }

    #[tokio::test]
    async fn soft_deleted_messages_disappear_from_history() {
        let db = memory_db().await;
        let owner = test_user("o@example.com");
        db.create_user(&owner).await.unwrap();
        let room = test_room(owner.id);
        db.create_room_with_owner(&room, &test_membership(room.id, owner.id, MemberRole::Owner))
            .await
            .unwrap();

        let message = test_message(room.id, owner.id, "hello");
        db.insert_message(&message).await.unwrap();
        assert_eq!(db.count_room_messages(room.id).await.unwrap(), 1);

        db.soft_delete_message(message.id, Utc::now()).await.unwrap();
        assert_eq!(db.count_room_messages(room.id).await.unwrap(), 0);
        assert!(db
            .list_room_messages(room.id, 50, 0, None)
            .await
            .unwrap()
            .is_empty());

        // Direct reads still see the row; callers check `deleted_at`.
        let loaded = db.get_message(message.id).await.unwrap().unwrap();
        assert!(loaded.is_deleted());
    }

    #[tokio::test]
    async fn moderation_update_is_a_noop_for_unknown_ids() {
        let db = memory_db().await;
        let meta = ModerationMeta {
            sentiment: Sentiment::Positive,
            flagged: true,
            reasons: vec!["spam".to_string()],
        };
        assert!(db
            .update_message_moderation(MessageId::new(), &meta)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn moderation_update_rewrites_meta() {
        let db = memory_db().await;
        let owner = test_user("o@example.com");
        db.create_user(&owner).await.unwrap();
        let room = test_room(owner.id);
        db.create_room_with_owner(&room, &test_membership(room.id, owner.id, MemberRole::Owner))
            .await
            .unwrap();

        let message = test_message(room.id, owner.id, "hello");
        db.insert_message(&message).await.unwrap();

        let meta = ModerationMeta {
            sentiment: Sentiment::Negative,
            flagged: true,
            reasons: vec!["toxicity".to_string()],
        };
        let updated = db
            .update_message_moderation(message.id, &meta)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.moderation, meta);
    }
}
