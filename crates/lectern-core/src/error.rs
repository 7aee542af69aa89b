//! Error types for lectern.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using lectern's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for lectern repository operations.
///
/// Storage-level constraint failures are translated into the named variants
/// below at the repository boundary, so callers can branch on them without
/// inspecting PostgreSQL error codes.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Group slug already used by another group
    #[error("Group slug already taken: {0}")]
    SlugTaken(String),

    /// Another group already sits at this hierarchy path
    #[error("Group path already taken: {0}")]
    PathTaken(String),

    /// Email already registered (case-insensitive)
    #[error("Email already registered: {0}")]
    EmailTaken(String),

    /// The user already holds a role in the group
    #[error("User {user_id} is already a member of group {group_id}")]
    AlreadyMember { user_id: Uuid, group_id: Uuid },

    /// A message with this sequence already exists in the session
    #[error("Session {session_id} already has a message with sequence {sequence}")]
    DuplicateSequence { session_id: Uuid, sequence: i32 },

    /// Any other uniqueness violation
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Foreign key points at a row that does not exist
    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    /// Check constraint or application-level invariant rejected the write
    #[error("Invalid invariant: {0}")]
    InvariantViolation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("group demo".to_string());
        assert_eq!(err.to_string(), "Not found: group demo");
    }

    #[test]
    fn test_error_display_slug_taken() {
        let err = Error::SlugTaken("north-district".to_string());
        assert_eq!(err.to_string(), "Group slug already taken: north-district");
    }

    #[test]
    fn test_error_display_path_taken() {
        let err = Error::PathTaken("north.lincoln_high".to_string());
        assert_eq!(err.to_string(), "Group path already taken: north.lincoln_high");
    }

    #[test]
    fn test_error_display_already_member() {
        let err = Error::AlreadyMember {
            user_id: Uuid::nil(),
            group_id: Uuid::nil(),
        };
        assert!(err.to_string().contains("already a member"));
    }

    #[test]
    fn test_error_display_duplicate_sequence() {
        let id = Uuid::new_v4();
        let err = Error::DuplicateSequence {
            session_id: id,
            sequence: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("sequence 3"));
    }

    #[test]
    fn test_error_display_dangling_reference() {
        let err = Error::DanglingReference("group_members.user_id".to_string());
        assert_eq!(
            err.to_string(),
            "Dangling reference: group_members.user_id"
        );
    }

    #[test]
    fn test_error_display_invariant() {
        let err = Error::InvariantViolation("session cannot be its own parent".to_string());
        assert!(err.to_string().starts_with("Invalid invariant:"));
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("DATABASE_URL is not set".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: DATABASE_URL is not set"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
