//! Message repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use lectern_core::{
    new_v7, CreateMessageRequest, Error, Message, MessageMetadata, MessageRepository, Result,
};

use crate::constraint::{db_err, map_db_err, Violation, MESSAGES_SESSION_SEQUENCE_KEY};

const MESSAGE_COLUMNS: &str = "id, session_id, role, content, sequence, created_at, metadata";

/// PostgreSQL implementation of MessageRepository.
pub struct PgMessageRepository {
    pool: Pool<Postgres>,
}

impl PgMessageRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn message_violation(v: &Violation, session_id: Uuid, sequence: i32) -> Option<Error> {
    if v.is_unique(MESSAGES_SESSION_SEQUENCE_KEY) {
        Some(Error::DuplicateSequence {
            session_id,
            sequence,
        })
    } else if v.is_foreign_key() {
        Some(Error::DanglingReference(format!(
            "chat session {}",
            session_id
        )))
    } else {
        None
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, req: CreateMessageRequest) -> Result<Message> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Row lock on the session serializes sequence allocation.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM chat_sessions WHERE id = $1 FOR UPDATE")
                .bind(req.session_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        if locked.is_none() {
            return Err(Error::DanglingReference(format!(
                "chat session {}",
                req.session_id
            )));
        }

        let sequence: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM messages WHERE session_id = $1",
        )
        .bind(req.session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let now = Utc::now();
        let message = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages (id, session_id, role, content, sequence, created_at, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(req.session_id)
        .bind(req.role)
        .bind(&req.content)
        .bind(sequence)
        .bind(now)
        .bind(Json(&req.metadata))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_err(e, |v| message_violation(v, req.session_id, sequence)))?;

        sqlx::query("UPDATE chat_sessions SET last_activity_at = $1 WHERE id = $2")
            .bind(now)
            .bind(req.session_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(
            subsystem = "db",
            component = "messages",
            op = "append",
            session_id = %req.session_id,
            sequence,
            "Message appended"
        );
        Ok(message)
    }

    async fn insert_at(&self, req: CreateMessageRequest, sequence: i32) -> Result<Message> {
        if sequence < 1 {
            return Err(Error::InvalidInput(format!(
                "message sequence must be at least 1, got {}",
                sequence
            )));
        }

        sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages (id, session_id, role, content, sequence, created_at, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(req.session_id)
        .bind(req.role)
        .bind(&req.content)
        .bind(sequence)
        .bind(Utc::now())
        .bind(Json(&req.metadata))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err(e, |v| message_violation(v, req.session_id, sequence)))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>> {
        sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = $1 ORDER BY sequence"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_up_to(&self, session_id: Uuid, up_to: i32) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = $1 AND sequence <= $2
             ORDER BY sequence"
        ))
        .bind(session_id)
        .bind(up_to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn update_metadata(&self, id: Uuid, metadata: &MessageMetadata) -> Result<Message> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("message {}", id)))?;

        let enriched = current.metadata.enrich(metadata)?;

        let updated = sqlx::query_as::<_, Message>(&format!(
            "UPDATE messages SET metadata = $1 WHERE id = $2 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Json(&enriched))
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn count_for_session(&self, session_id: Uuid) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ViolationKind;

    fn violation(kind: ViolationKind, constraint: &str) -> Violation {
        Violation {
            kind,
            constraint: constraint.to_string(),
            message: String::new(),
        }
    }

    #[test]
    fn test_sequence_conflict_maps_to_duplicate_sequence() {
        let session = Uuid::new_v4();
        let v = violation(ViolationKind::Unique, MESSAGES_SESSION_SEQUENCE_KEY);
        match message_violation(&v, session, 3) {
            Some(Error::DuplicateSequence {
                session_id,
                sequence,
            }) => {
                assert_eq!(session_id, session);
                assert_eq!(sequence, 3);
            }
            other => panic!("Expected DuplicateSequence, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_session_maps_to_dangling_reference() {
        let v = violation(ViolationKind::ForeignKey, "messages_session_id_fkey");
        assert!(matches!(
            message_violation(&v, Uuid::nil(), 1),
            Some(Error::DanglingReference(_))
        ));
    }

    #[test]
    fn test_other_checks_fall_through() {
        let v = violation(ViolationKind::Check, "messages_sequence_positive");
        assert!(message_violation(&v, Uuid::nil(), 0).is_none());
    }
}
