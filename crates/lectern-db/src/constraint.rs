//! Translation of PostgreSQL constraint failures into domain errors.
//!
//! Repositories call [`map_db_err`] with a closure that recognizes the
//! constraints they own (`groups_slug_key` → `SlugTaken`, ...). Anything the
//! closure does not claim still comes back as a named kind (`Duplicate`,
//! `DanglingReference`, `InvariantViolation`) rather than a raw sqlx error.

use sqlx::error::ErrorKind;

use lectern_core::Error;

// Constraint and index names declared in migrations/.
pub const USERS_EMAIL_KEY: &str = "users_email_lower_key";
pub const TOOLS_SLUG_KEY: &str = "tools_slug_key";
pub const GROUPS_SLUG_KEY: &str = "groups_slug_key";
pub const GROUPS_PATH_KEY: &str = "groups_path_key";
pub const GROUP_MEMBERS_USER_GROUP_KEY: &str = "group_members_user_group_key";
pub const GROUP_MEMBERS_NO_SYSTEM_ADMIN: &str = "group_members_no_system_admin";
pub const MESSAGES_SESSION_SEQUENCE_KEY: &str = "messages_session_sequence_key";
pub const CHAT_SESSIONS_NO_SELF_PARENT: &str = "chat_sessions_no_self_parent";

/// Which class of constraint rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Unique,
    ForeignKey,
    Check,
    NotNull,
}

/// A classified constraint failure.
#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Constraint or index name, empty when the server did not report one.
    pub constraint: String,
    /// Server message, kept for the fallback error text.
    pub message: String,
}

impl Violation {
    /// Classify an sqlx error; `None` for anything that is not a constraint failure.
    pub fn of(err: &sqlx::Error) -> Option<Self> {
        let db_err = err.as_database_error()?;
        let kind = match db_err.kind() {
            ErrorKind::UniqueViolation => ViolationKind::Unique,
            ErrorKind::ForeignKeyViolation => ViolationKind::ForeignKey,
            ErrorKind::CheckViolation => ViolationKind::Check,
            ErrorKind::NotNullViolation => ViolationKind::NotNull,
            _ => return None,
        };
        Some(Self {
            kind,
            constraint: db_err.constraint().unwrap_or_default().to_string(),
            message: db_err.message().to_string(),
        })
    }

    pub fn is_unique(&self, constraint: &str) -> bool {
        self.kind == ViolationKind::Unique && self.constraint == constraint
    }

    pub fn is_check(&self, constraint: &str) -> bool {
        self.kind == ViolationKind::Check && self.constraint == constraint
    }

    pub fn is_foreign_key(&self) -> bool {
        self.kind == ViolationKind::ForeignKey
    }

    /// Generic named error for a violation no repository claimed.
    pub fn into_error(self) -> Error {
        let what = if self.constraint.is_empty() {
            self.message
        } else {
            format!("{} ({})", self.constraint, self.message)
        };
        match self.kind {
            ViolationKind::Unique => Error::Duplicate(what),
            ViolationKind::ForeignKey => Error::DanglingReference(what),
            ViolationKind::Check | ViolationKind::NotNull => Error::InvariantViolation(what),
        }
    }
}

/// Map an sqlx error, letting `domain` claim constraints it recognizes.
pub fn map_db_err<F>(err: sqlx::Error, domain: F) -> Error
where
    F: FnOnce(&Violation) -> Option<Error>,
{
    match Violation::of(&err) {
        Some(violation) => domain(&violation).unwrap_or_else(|| violation.into_error()),
        None => Error::Database(err),
    }
}

/// Map an sqlx error with no repository-specific constraints.
pub fn db_err(err: sqlx::Error) -> Error {
    map_db_err(err, |_| None)
}
