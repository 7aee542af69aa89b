//! Repository traits for lectern entities.
//!
//! These traits define the interfaces that the PostgreSQL implementations in
//! `lectern-db` satisfy. Constraint failures come back as the named
//! [`Error`](crate::Error) variants, never as raw database error codes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::metadata::MessageMetadata;
use crate::models::*;
use crate::path::HierarchyPath;
use crate::settings::GroupSettings;

// =============================================================================
// USER REPOSITORY
// =============================================================================

/// Repository for user accounts and global administration grants.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Register a user. Fails with `EmailTaken` on a case-insensitive clash.
    async fn create(&self, req: CreateUserRequest) -> Result<User>;

    /// Fetch a user by id, including soft-deleted ones.
    async fn get(&self, id: Uuid) -> Result<Option<User>>;

    /// Case-insensitive lookup among live users.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// List live users, newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>>;

    async fn update_status(&self, id: Uuid, status: UserStatus) -> Result<()>;

    /// Mark deleted without removing the row.
    async fn soft_delete(&self, id: Uuid) -> Result<()>;

    /// Clear the deletion mark.
    async fn restore(&self, id: Uuid) -> Result<()>;

    /// Remove the row; memberships, sessions and messages cascade.
    async fn hard_delete(&self, id: Uuid) -> Result<()>;

    async fn grant_system_admin(&self, user_id: Uuid) -> Result<()>;

    async fn revoke_system_admin(&self, user_id: Uuid) -> Result<()>;

    async fn is_system_admin(&self, user_id: Uuid) -> Result<bool>;
}

// =============================================================================
// TOOL REPOSITORY
// =============================================================================

#[async_trait]
pub trait ToolRepository: Send + Sync {
    async fn create(&self, req: CreateToolRequest) -> Result<Tool>;

    async fn get(&self, id: Uuid) -> Result<Option<Tool>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tool>>;

    async fn list(&self) -> Result<Vec<Tool>>;

    async fn soft_delete(&self, id: Uuid) -> Result<()>;

    /// Remove the row; its sessions cascade.
    async fn hard_delete(&self, id: Uuid) -> Result<()>;
}

// =============================================================================
// GROUP REPOSITORY
// =============================================================================

/// Repository for the organization hierarchy.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Create a group. The path is the parent's path plus a label derived
    /// from the slug; the type must match the resulting depth.
    async fn create(&self, req: CreateGroupRequest) -> Result<Group>;

    async fn get(&self, id: Uuid) -> Result<Option<Group>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Group>>;

    /// Live district-level groups.
    async fn list_roots(&self) -> Result<Vec<Group>>;

    /// Live groups at or below `path`, shallowest first.
    async fn descendants_of(&self, path: &HierarchyPath) -> Result<Vec<Group>>;

    /// Live groups at or above `path`, root first.
    async fn ancestors_of(&self, path: &HierarchyPath) -> Result<Vec<Group>>;

    /// Live groups whose path matches an lquery pattern (e.g. `district1.*{1}`).
    async fn matching(&self, pattern: &str) -> Result<Vec<Group>>;

    /// Live groups whose path has exactly `depth` labels.
    async fn at_depth(&self, depth: i32) -> Result<Vec<Group>>;

    /// Replace this group's own settings document.
    async fn update_settings(&self, id: Uuid, settings: &GroupSettings) -> Result<()>;

    /// Settings merged from the root down to this group.
    async fn effective_settings(&self, id: Uuid) -> Result<GroupSettings>;

    async fn soft_delete(&self, id: Uuid) -> Result<()>;

    /// Remove the row; its memberships cascade.
    async fn hard_delete(&self, id: Uuid) -> Result<()>;
}

// =============================================================================
// MEMBERSHIP REPOSITORY
// =============================================================================

#[async_trait]
pub trait GroupMemberRepository: Send + Sync {
    /// Add a membership. Fails with `AlreadyMember` if the pair exists.
    async fn add(&self, user_id: Uuid, group_id: Uuid, role: MemberRole) -> Result<GroupMember>;

    /// Insert or change the role for a (user, group) pair in place.
    async fn set_role(&self, user_id: Uuid, group_id: Uuid, role: MemberRole)
        -> Result<GroupMember>;

    /// Remove a membership; returns whether a row was deleted.
    async fn remove(&self, user_id: Uuid, group_id: Uuid) -> Result<bool>;

    async fn role_of(&self, user_id: Uuid, group_id: Uuid) -> Result<Option<MemberRole>>;

    async fn list_for_group(&self, group_id: Uuid) -> Result<Vec<GroupMember>>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<GroupMember>>;
}

// =============================================================================
// CHAT SESSION REPOSITORY
// =============================================================================

#[async_trait]
pub trait ChatSessionRepository: Send + Sync {
    async fn create(&self, req: CreateChatSessionRequest) -> Result<ChatSession>;

    async fn get(&self, id: Uuid) -> Result<Option<ChatSession>>;

    /// Live sessions for a user, most recently active first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ChatSession>>;

    /// Transition active → completed and stamp `ended_at`.
    async fn complete(&self, id: Uuid) -> Result<ChatSession>;

    /// Stamp `last_activity_at` with the current time.
    async fn touch_activity(&self, id: Uuid) -> Result<()>;

    async fn set_title(&self, id: Uuid, title: Option<&str>) -> Result<()>;

    /// Re-point the parent reference. A session may not be its own parent.
    async fn set_parent(&self, id: Uuid, parent_id: Option<Uuid>) -> Result<()>;

    /// Branch a session at a message sequence, copying messages up to and
    /// including that sequence into the new session.
    async fn fork(&self, req: ForkSessionRequest) -> Result<ChatSession>;

    /// Direct forks of a session.
    async fn list_forks(&self, parent_id: Uuid) -> Result<Vec<ChatSession>>;

    /// Forks whose source session no longer exists.
    async fn list_orphaned_forks(&self, user_id: Uuid) -> Result<Vec<ChatSession>>;

    async fn soft_delete(&self, id: Uuid) -> Result<()>;

    async fn restore(&self, id: Uuid) -> Result<()>;

    /// Remove the row; messages cascade and forks lose their parent reference.
    async fn hard_delete(&self, id: Uuid) -> Result<()>;
}

// =============================================================================
// MESSAGE REPOSITORY
// =============================================================================

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Append with the next free sequence number for the session.
    async fn append(&self, req: CreateMessageRequest) -> Result<Message>;

    /// Insert at an explicit sequence. Fails with `DuplicateSequence` if taken.
    async fn insert_at(&self, req: CreateMessageRequest, sequence: i32) -> Result<Message>;

    async fn get(&self, id: Uuid) -> Result<Option<Message>>;

    /// All messages in sequence order.
    async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<Message>>;

    /// Messages with `sequence <= up_to`, in order.
    async fn list_up_to(&self, session_id: Uuid, up_to: i32) -> Result<Vec<Message>>;

    /// Merge later metadata (token counts, latency, ...) onto a message.
    async fn update_metadata(&self, id: Uuid, metadata: &MessageMetadata) -> Result<Message>;

    async fn count_for_session(&self, session_id: Uuid) -> Result<i64>;
}
