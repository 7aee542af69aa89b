//! User repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use lectern_core::{
    canonical_email, new_v7, CreateUserRequest, Error, Result, User, UserRepository, UserStatus,
};

use crate::constraint::{db_err, map_db_err, USERS_EMAIL_KEY};

const USER_COLUMNS: &str =
    "id, email, display_name, password_hash, status, created_at, updated_at, deleted_at";

/// PostgreSQL implementation of UserRepository.
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn set_deleted_at(&self, id: Uuid, deleted: bool) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE users
             SET deleted_at = CASE WHEN $2 THEN $3 ELSE NULL END, updated_at = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(deleted)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, req: CreateUserRequest) -> Result<User> {
        let email = canonical_email(&req.email);
        if email.is_empty() {
            return Err(Error::InvalidInput("email cannot be empty".to_string()));
        }
        let now = Utc::now();

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, email, display_name, password_hash, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(&email)
        .bind(&req.display_name)
        .bind(req.credential.password_hash())
        .bind(req.status)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_db_err(e, |v| {
                v.is_unique(USERS_EMAIL_KEY)
                    .then(|| Error::EmailTaken(email.clone()))
            })
        })?;

        info!(subsystem = "db", component = "users", op = "create", user_id = %user.id, "User created");
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE lower(email) = $1 AND deleted_at IS NULL"
        ))
        .bind(canonical_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE deleted_at IS NULL
             ORDER BY created_at DESC
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn update_status(&self, id: Uuid, status: UserStatus) -> Result<()> {
        let result = sqlx::query("UPDATE users SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        self.set_deleted_at(id, true).await
    }

    async fn restore(&self, id: Uuid) -> Result<()> {
        self.set_deleted_at(id, false).await
    }

    async fn hard_delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {}", id)));
        }
        info!(subsystem = "db", component = "users", op = "hard_delete", user_id = %id, "User removed");
        Ok(())
    }

    async fn grant_system_admin(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_admins (user_id, granted_at) VALUES ($1, $2)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_db_err(e, |v| {
                v.is_foreign_key()
                    .then(|| Error::DanglingReference(format!("user {}", user_id)))
            })
        })?;
        Ok(())
    }

    async fn revoke_system_admin(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM system_admins WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn is_system_admin(&self, user_id: Uuid) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM system_admins WHERE user_id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(exists)
    }
}
