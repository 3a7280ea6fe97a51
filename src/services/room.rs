use chrono::Utc;
use serde::Deserialize;

use crate::database::Database;
use crate::errors::RoomError;
use crate::models::{
    MemberRole, Membership, Paginated, Room, RoomId, RoomType, User, UserId,
};
use crate::sanitize::sanitize_room_name;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomInput {
    pub name: String,
    #[serde(rename = "type", default = "default_room_type")]
    pub room_type: RoomType,
    #[serde(default)]
    pub is_private: bool,
}

fn default_room_type() -> RoomType {
    RoomType::Channel
}

/// Rooms, memberships and the role rules that guard them.
///
/// Role invariants enforced here: every room keeps at least one owner, an
/// owner leaves only when another owner remains, and `members_count` always
/// equals the number of live memberships.
pub struct RoomService {
    db: Database,
}

impl RoomService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn validate_name(name: &str) -> Result<String, RoomError> {
        let name = sanitize_room_name(name);
        if name.is_empty() {
            return Err(RoomError::InvalidName {
                reason: "must not be empty".to_string(),
            });
        }
        Ok(name)
    }

    pub async fn create(&self, input: CreateRoomInput, creator: &User) -> Result<Room, RoomError> {
        let name = Self::validate_name(&input.name)?;
        let now = Utc::now();
        let room = Room {
            id: RoomId::new(),
            name,
            room_type: input.room_type,
            is_private: input.is_private,
            created_by: creator.id,
            members_count: 1,
            created_at: now,
            updated_at: now,
        };
        let owner = Membership {
            room_id: room.id,
            user_id: creator.id,
            role: MemberRole::Owner,
            joined_at: now,
            last_read_message: None,
            last_seen_at: None,
        };
        self.db.create_room_with_owner(&room, &owner).await?;
        Ok(room)
    }

    pub async fn get(&self, room_id: RoomId) -> Result<Room, RoomError> {
        self.db
            .get_room(room_id)
            .await?
            .ok_or(RoomError::NotFound { room_id })
    }

    /// Room details for a caller, membership-gated.
    pub async fn get_for_member(&self, room_id: RoomId, user_id: UserId) -> Result<Room, RoomError> {
        let room = self.get(room_id).await?;
        self.ensure_member(room_id, user_id).await?;
        Ok(room)
    }

    pub async fn update(
        &self,
        room_id: RoomId,
        caller: UserId,
        name: Option<&str>,
        is_private: Option<bool>,
    ) -> Result<Room, RoomError> {
        let role = self.require_role(room_id, caller).await?;
        if !matches!(role, MemberRole::Owner | MemberRole::Moderator) {
            return Err(RoomError::Forbidden {
                reason: "only owners and moderators may update a room".to_string(),
            });
        }

        let name = name.map(Self::validate_name).transpose()?;
        self.db.update_room(room_id, name.as_deref(), is_private).await?;
        self.get(room_id).await
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
        page: u32,
        limit: u32,
    ) -> Result<Paginated<Room>, RoomError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let offset = i64::from(page - 1) * i64::from(limit);

        let items = self
            .db
            .list_rooms_for_user(user_id, i64::from(limit), offset)
            .await?;
        let total = self.db.count_rooms_for_user(user_id).await?;
        let limit_i64 = i64::from(limit);
        let total_pages = ((total + limit_i64 - 1) / limit_i64).max(1) as u32;

        Ok(Paginated {
            has_next: page < total_pages,
            has_prev: page > 1,
            items,
            total,
            page,
            limit,
            total_pages,
        })
    }

    pub async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RoomError> {
        Ok(self.db.get_membership(room_id, user_id).await?.is_some())
    }

    pub async fn role_of(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<MemberRole>, RoomError> {
        Ok(self.db.get_membership(room_id, user_id).await?.map(|m| m.role))
    }

    /// Membership of `user_id` in `room_id`, or `NotAMember`.
    pub async fn ensure_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Membership, RoomError> {
        self.db
            .get_membership(room_id, user_id)
            .await?
            .ok_or(RoomError::NotAMember { user_id, room_id })
    }

    async fn require_role(&self, room_id: RoomId, user_id: UserId) -> Result<MemberRole, RoomError> {
        // Distinguish "no such room" from "not a member".
        self.get(room_id).await?;
        Ok(self.ensure_member(room_id, user_id).await?.role)
    }

    pub async fn members(
        &self,
        room_id: RoomId,
        caller: UserId,
    ) -> Result<Vec<Membership>, RoomError> {
        self.require_role(room_id, caller).await?;
        Ok(self.db.list_members(room_id).await?)
    }

    pub async fn add_member(
        &self,
        room_id: RoomId,
        caller: UserId,
        target: UserId,
    ) -> Result<Membership, RoomError> {
        let caller_role = self.require_role(room_id, caller).await?;
        if !matches!(caller_role, MemberRole::Owner | MemberRole::Moderator) {
            return Err(RoomError::Forbidden {
                reason: "only owners and moderators may add members".to_string(),
            });
        }

        if self.db.get_user_by_id(target).await?.is_none() {
            return Err(RoomError::UserNotFound);
        }
        if self.db.get_membership(room_id, target).await?.is_some() {
            return Err(RoomError::AlreadyMember { user_id: target, room_id });
        }

        let membership = Membership {
            room_id,
            user_id: target,
            role: MemberRole::Member,
            joined_at: Utc::now(),
            last_read_message: None,
            last_seen_at: None,
        };
        self.db.add_member(&membership).await?;
        Ok(membership)
    }

    /// Removal rules: anyone may remove themselves, owners may remove
    /// non-owners, moderators may remove plain members. An owner only leaves
    /// when another owner remains.
    pub async fn remove_member(
        &self,
        room_id: RoomId,
        caller: UserId,
        target: UserId,
    ) -> Result<(), RoomError> {
        let caller_role = self.require_role(room_id, caller).await?;
        let target_role = self
            .db
            .get_membership(room_id, target)
            .await?
            .map(|m| m.role)
            .ok_or(RoomError::TargetNotMember)?;

        if target_role == MemberRole::Owner {
            if caller != target {
                return Err(RoomError::Forbidden {
                    reason: "an owner can only be removed by themselves".to_string(),
                });
            }
            if self.db.count_owners(room_id).await? <= 1 {
                return Err(RoomError::SoleOwner);
            }
        } else if caller != target {
            let allowed = match caller_role {
                MemberRole::Owner => true,
                MemberRole::Moderator => target_role == MemberRole::Member,
                MemberRole::Member => false,
            };
            if !allowed {
                return Err(RoomError::Forbidden {
                    reason: "insufficient role to remove this member".to_string(),
                });
            }
        }

        self.db.remove_member(room_id, target).await?;
        Ok(())
    }

    /// Only owners change roles, never their own. Demoting the counterpart
    /// owner is safe: the caller being an owner guarantees one remains.
    pub async fn update_member_role(
        &self,
        room_id: RoomId,
        caller: UserId,
        target: UserId,
        role: MemberRole,
    ) -> Result<Membership, RoomError> {
        let caller_role = self.require_role(room_id, caller).await?;
        if caller_role != MemberRole::Owner {
            return Err(RoomError::Forbidden {
                reason: "only owners may change member roles".to_string(),
            });
        }
        if caller == target {
            return Err(RoomError::Forbidden {
                reason: "owners cannot change their own role".to_string(),
            });
        }
        if self.db.get_membership(room_id, target).await?.is_none() {
            return Err(RoomError::TargetNotMember);
        }

        self.db.update_member_role(room_id, target, role).await?;
        self.ensure_member(room_id, target).await
    }
}
