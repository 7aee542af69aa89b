//! Core data models for lectern.
//!
//! Each entity has a full record struct (what a read returns, including
//! generated ids and timestamps) and a `Create*Request` struct carrying only
//! what a caller must supply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::MessageMetadata;
use crate::path::HierarchyPath;
use crate::settings::GroupSettings;

// =============================================================================
// USERS
// =============================================================================

/// Account status (`user_status` enum).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "user_status", rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    PendingVerification,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::PendingVerification => "pending_verification",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "pending_verification" => Ok(Self::PendingVerification),
            _ => Err(format!("Invalid user status: {}", s)),
        }
    }
}

/// How an account authenticates.
///
/// A user has either a password hash or is OAuth-only, never both and never
/// neither, so the choice is a single value rather than two nullable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password hash produced by the auth layer (opaque here).
    Password(String),
    /// Authenticates exclusively through an external identity provider.
    OAuth,
}

impl Credential {
    /// Column value for `users.password_hash`.
    pub fn password_hash(&self) -> Option<&str> {
        match self {
            Self::Password(hash) => Some(hash),
            Self::OAuth => None,
        }
    }
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    /// Absent for OAuth-only accounts.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn credential(&self) -> Credential {
        match &self.password_hash {
            Some(hash) => Credential::Password(hash.clone()),
            None => Credential::OAuth,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Request for registering a user.
#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
    pub credential: Credential,
    pub status: UserStatus,
}

/// Canonical form of an email address: trimmed and lowercased.
pub fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// =============================================================================
// TOOLS
// =============================================================================

/// A chat tool that sessions run against.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tool {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Request for creating a tool.
#[derive(Debug, Clone)]
pub struct CreateToolRequest {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
}

// =============================================================================
// GROUPS
// =============================================================================

/// Level of a group in the organization hierarchy (`group_type` enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "group_type", rename_all = "snake_case")]
pub enum GroupType {
    District,
    School,
    Department,
}

impl GroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::District => "district",
            Self::School => "school",
            Self::Department => "department",
        }
    }

    /// Path depth a group of this type sits at.
    pub fn depth(&self) -> usize {
        match self {
            Self::District => 1,
            Self::School => 2,
            Self::Department => 3,
        }
    }

    /// Type expected at a given path depth.
    pub fn for_depth(depth: usize) -> Option<Self> {
        match depth {
            1 => Some(Self::District),
            2 => Some(Self::School),
            3 => Some(Self::Department),
            _ => None,
        }
    }
}

impl std::fmt::Display for GroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GroupType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "district" => Ok(Self::District),
            "school" => Ok(Self::School),
            "department" => Ok(Self::Department),
            _ => Err(format!("Invalid group type: {}", s)),
        }
    }
}

/// A node in the district → school → department hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub group_type: GroupType,
    pub path: HierarchyPath,
    /// This group's own overrides; see `GroupRepository::effective_settings`.
    #[sqlx(json)]
    pub settings: GroupSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Group {
    /// Whether the stored path depth agrees with the group type.
    pub fn depth_matches_type(&self) -> bool {
        self.path.depth() == self.group_type.depth()
    }
}

/// Request for creating a group.
#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub name: String,
    pub slug: String,
    pub group_type: GroupType,
    /// Parent group; `None` creates a district root.
    pub parent_id: Option<Uuid>,
    pub settings: GroupSettings,
}

// =============================================================================
// GROUP MEMBERSHIP
// =============================================================================

/// Role a user holds in a group (`member_role` enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "member_role", rename_all = "snake_case")]
pub enum MemberRole {
    /// Global administration. Granted through `system_admins`, never as a
    /// group membership; the value is kept for wire compatibility.
    SystemAdmin,
    GroupAdmin,
    Teacher,
    Student,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemAdmin => "system_admin",
            Self::GroupAdmin => "group_admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }

    /// Whether this role may be stored in `group_members`.
    pub fn is_group_scoped(&self) -> bool {
        !matches!(self, Self::SystemAdmin)
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemberRole {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system_admin" => Ok(Self::SystemAdmin),
            "group_admin" => Ok(Self::GroupAdmin),
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            _ => Err(format!("Invalid member role: {}", s)),
        }
    }
}

/// A user's role within one group.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupMember {
    pub id: Uuid,
    pub user_id: Uuid,
    pub group_id: Uuid,
    pub role: MemberRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// CHAT SESSIONS
// =============================================================================

/// Lifecycle state of a session (`session_state` enum).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "session_state", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Active,
    Completed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Only active → completed is allowed.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!((self, next), (Self::Active, Self::Completed))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub user_id: Uuid,
    pub state: SessionState,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Session this one was forked from. Cleared if that session is removed.
    pub parent_session_id: Option<Uuid>,
    /// Message sequence the fork branched at. Survives parent removal.
    pub fork_from_seq: Option<i32>,
}

impl ChatSession {
    pub fn is_fork(&self) -> bool {
        self.fork_from_seq.is_some()
    }

    /// A fork whose source session has been hard-deleted.
    pub fn is_orphaned_fork(&self) -> bool {
        self.fork_from_seq.is_some() && self.parent_session_id.is_none()
    }
}

/// Request for starting a session.
#[derive(Debug, Clone)]
pub struct CreateChatSessionRequest {
    pub tool_id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
}

/// Request for forking a session at a message sequence.
#[derive(Debug, Clone)]
pub struct ForkSessionRequest {
    pub source_session_id: Uuid,
    /// Last message sequence carried into the fork (inclusive).
    pub from_sequence: i32,
    /// Owner of the fork; defaults to the source session's owner.
    pub user_id: Option<Uuid>,
    pub title: Option<String>,
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Author of a message (`message_role` enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "message_role", rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

/// One turn in a session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// 1-based, unique within the session.
    pub sequence: i32,
    pub created_at: DateTime<Utc>,
    #[sqlx(json)]
    pub metadata: MessageMetadata,
}

/// Request for appending a message.
#[derive(Debug, Clone)]
pub struct CreateMessageRequest {
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
}
