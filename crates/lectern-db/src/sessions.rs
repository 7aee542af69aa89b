//! Chat session repository implementation.
//!
//! Forks reference their source through `parent_session_id`, which the
//! schema declares `ON DELETE SET NULL`: removing a source keeps its forks
//! alive and leaves `fork_from_seq` in place, which is how orphaned forks are
//! recognized later.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use lectern_core::{
    new_v7, ChatSession, ChatSessionRepository, CreateChatSessionRequest, Error,
    ForkSessionRequest, Result, SessionState,
};

use crate::constraint::{db_err, map_db_err, CHAT_SESSIONS_NO_SELF_PARENT};

const SESSION_COLUMNS: &str = "id, tool_id, user_id, state, title, started_at, ended_at, \
                               last_activity_at, deleted_at, parent_session_id, fork_from_seq";

/// PostgreSQL implementation of ChatSessionRepository.
pub struct PgChatSessionRepository {
    pool: Pool<Postgres>,
}

impl PgChatSessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn list_where(&self, predicate: &str, bind: Uuid) -> Result<Vec<ChatSession>> {
        sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions
             WHERE {predicate} AND deleted_at IS NULL
             ORDER BY COALESCE(last_activity_at, started_at) DESC"
        ))
        .bind(bind)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn set_deleted_at(&self, id: Uuid, deleted: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE chat_sessions
             SET deleted_at = CASE WHEN $2 THEN $3 ELSE NULL END
             WHERE id = $1",
        )
        .bind(id)
        .bind(deleted)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("chat session {}", id)));
        }
        Ok(())
    }

    /// Copy messages `1..=up_to` from one session to another with fresh ids.
    async fn copy_messages_tx(
        tx: &mut Transaction<'_, Postgres>,
        from: Uuid,
        to: Uuid,
        up_to: i32,
    ) -> Result<u64> {
        let sequences: Vec<i32> = sqlx::query_scalar(
            "SELECT sequence FROM messages WHERE session_id = $1 AND sequence <= $2 ORDER BY sequence",
        )
        .bind(from)
        .bind(up_to)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err)?;

        if sequences.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = sequences.iter().map(|_| new_v7()).collect();

        let result = sqlx::query(
            "INSERT INTO messages (id, session_id, role, content, sequence, created_at, metadata)
             SELECT fresh.id, $2, m.role, m.content, m.sequence, m.created_at, m.metadata
             FROM messages m
             JOIN UNNEST($3::int4[], $4::uuid[]) AS fresh(sequence, id)
               ON fresh.sequence = m.sequence
             WHERE m.session_id = $1",
        )
        .bind(from)
        .bind(to)
        .bind(&sequences)
        .bind(&ids)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ChatSessionRepository for PgChatSessionRepository {
    async fn create(&self, req: CreateChatSessionRequest) -> Result<ChatSession> {
        let now = Utc::now();
        let session = sqlx::query_as::<_, ChatSession>(&format!(
            "INSERT INTO chat_sessions (id, tool_id, user_id, state, title, started_at, last_activity_at)
             VALUES ($1, $2, $3, 'active', $4, $5, $5)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(req.tool_id)
        .bind(req.user_id)
        .bind(req.title.as_deref())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        info!(
            subsystem = "db",
            component = "sessions",
            op = "create",
            session_id = %session.id,
            user_id = %session.user_id,
            "Chat session started"
        );
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ChatSession>> {
        sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ChatSession>> {
        self.list_where("user_id = $1", user_id).await
    }

    async fn complete(&self, id: Uuid) -> Result<ChatSession> {
        let updated = sqlx::query_as::<_, ChatSession>(&format!(
            "UPDATE chat_sessions
             SET state = 'completed', ended_at = $2
             WHERE id = $1 AND state = 'active'
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match updated {
            Some(session) => Ok(session),
            None => match self.get(id).await? {
                Some(existing) => Err(Error::InvariantViolation(format!(
                    "chat session {} cannot move from {} to {}",
                    id,
                    existing.state,
                    SessionState::Completed
                ))),
                None => Err(Error::NotFound(format!("chat session {}", id))),
            },
        }
    }

    async fn touch_activity(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE chat_sessions SET last_activity_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("chat session {}", id)));
        }
        Ok(())
    }

    async fn set_title(&self, id: Uuid, title: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE chat_sessions SET title = $1 WHERE id = $2")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("chat session {}", id)));
        }
        Ok(())
    }

    async fn set_parent(&self, id: Uuid, parent_id: Option<Uuid>) -> Result<()> {
        if parent_id == Some(id) {
            return Err(Error::InvariantViolation(format!(
                "chat session {} cannot be its own parent",
                id
            )));
        }

        let result = sqlx::query("UPDATE chat_sessions SET parent_session_id = $1 WHERE id = $2")
            .bind(parent_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_db_err(e, |v| {
                    if v.is_check(CHAT_SESSIONS_NO_SELF_PARENT) {
                        Some(Error::InvariantViolation(format!(
                            "chat session {} cannot be its own parent",
                            id
                        )))
                    } else if v.is_foreign_key() {
                        parent_id.map(|p| {
                            Error::DanglingReference(format!("parent chat session {}", p))
                        })
                    } else {
                        None
                    }
                })
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("chat session {}", id)));
        }
        Ok(())
    }

    async fn fork(&self, req: ForkSessionRequest) -> Result<ChatSession> {
        if req.from_sequence < 1 {
            return Err(Error::InvalidInput(format!(
                "fork sequence must be at least 1, got {}",
                req.from_sequence
            )));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Share lock keeps the source from being removed mid-fork.
        let source = sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1 FOR SHARE"
        ))
        .bind(req.source_session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("chat session {}", req.source_session_id)))?;

        let last_sequence: Option<i32> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM messages WHERE session_id = $1")
                .bind(source.id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;

        if last_sequence.map_or(true, |last| req.from_sequence > last) {
            return Err(Error::InvalidInput(format!(
                "chat session {} has no message with sequence {}",
                source.id, req.from_sequence
            )));
        }

        let now = Utc::now();
        let fork = sqlx::query_as::<_, ChatSession>(&format!(
            "INSERT INTO chat_sessions
                (id, tool_id, user_id, state, title, started_at, last_activity_at,
                 parent_session_id, fork_from_seq)
             VALUES ($1, $2, $3, 'active', $4, $5, $5, $6, $7)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(source.tool_id)
        .bind(req.user_id.unwrap_or(source.user_id))
        .bind(req.title.as_deref().or(source.title.as_deref()))
        .bind(now)
        .bind(source.id)
        .bind(req.from_sequence)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let copied = Self::copy_messages_tx(&mut tx, source.id, fork.id, req.from_sequence).await?;

        tx.commit().await.map_err(db_err)?;

        info!(
            subsystem = "db",
            component = "sessions",
            op = "fork",
            session_id = %fork.id,
            parent_session_id = %source.id,
            fork_from_seq = req.from_sequence,
            copied_messages = copied,
            "Chat session forked"
        );
        Ok(fork)
    }

    async fn list_forks(&self, parent_id: Uuid) -> Result<Vec<ChatSession>> {
        self.list_where("parent_session_id = $1", parent_id).await
    }

    async fn list_orphaned_forks(&self, user_id: Uuid) -> Result<Vec<ChatSession>> {
        self.list_where(
            "user_id = $1 AND parent_session_id IS NULL AND fork_from_seq IS NOT NULL",
            user_id,
        )
        .await
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        self.set_deleted_at(id, true).await
    }

    async fn restore(&self, id: Uuid) -> Result<()> {
        self.set_deleted_at(id, false).await
    }

    async fn hard_delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let forks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions WHERE parent_session_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;

        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("chat session {}", id)));
        }

        tx.commit().await.map_err(db_err)?;

        if forks > 0 {
            warn!(
                subsystem = "db",
                component = "sessions",
                op = "hard_delete",
                session_id = %id,
                orphaned_forks = forks,
                "Removed a session with forks; forks keep fork_from_seq"
            );
        }
        Ok(())
    }
}
