//! Tool repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use lectern_core::{new_v7, CreateToolRequest, Error, Result, Tool, ToolRepository};

use crate::constraint::{db_err, map_db_err, TOOLS_SLUG_KEY};

const TOOL_COLUMNS: &str = "id, slug, name, description, created_at, updated_at, deleted_at";

/// PostgreSQL implementation of ToolRepository.
pub struct PgToolRepository {
    pool: Pool<Postgres>,
}

impl PgToolRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ToolRepository for PgToolRepository {
    async fn create(&self, req: CreateToolRequest) -> Result<Tool> {
        let now = Utc::now();
        sqlx::query_as::<_, Tool>(&format!(
            "INSERT INTO tools (id, slug, name, description, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             RETURNING {TOOL_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(&req.slug)
        .bind(&req.name)
        .bind(req.description.as_deref())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_db_err(e, |v| {
                v.is_unique(TOOLS_SLUG_KEY)
                    .then(|| Error::Duplicate(format!("tool slug {}", req.slug)))
            })
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Tool>> {
        sqlx::query_as::<_, Tool>(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tool>> {
        sqlx::query_as::<_, Tool>(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools WHERE slug = $1 AND deleted_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list(&self) -> Result<Vec<Tool>> {
        sqlx::query_as::<_, Tool>(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools WHERE deleted_at IS NULL ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tools SET deleted_at = $1, updated_at = $1 WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("tool {}", id)));
        }
        Ok(())
    }

    async fn hard_delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM tools WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("tool {}", id)));
        }
        Ok(())
    }
}
