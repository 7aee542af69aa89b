//! Group membership repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use lectern_core::{new_v7, Error, GroupMember, GroupMemberRepository, MemberRole, Result};

use crate::constraint::{
    db_err, map_db_err, Violation, GROUP_MEMBERS_NO_SYSTEM_ADMIN, GROUP_MEMBERS_USER_GROUP_KEY,
};

const MEMBER_COLUMNS: &str = "id, user_id, group_id, role, created_at, updated_at";

/// PostgreSQL implementation of GroupMemberRepository.
pub struct PgGroupMemberRepository {
    pool: Pool<Postgres>,
}

impl PgGroupMemberRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn reject_global_role(role: MemberRole) -> Result<()> {
    if role.is_group_scoped() {
        Ok(())
    } else {
        Err(Error::InvariantViolation(
            "system_admin is granted through system_admins, not group membership".to_string(),
        ))
    }
}

fn membership_violation(v: &Violation, user_id: Uuid, group_id: Uuid) -> Option<Error> {
    if v.is_unique(GROUP_MEMBERS_USER_GROUP_KEY) {
        Some(Error::AlreadyMember { user_id, group_id })
    } else if v.is_check(GROUP_MEMBERS_NO_SYSTEM_ADMIN) {
        Some(Error::InvariantViolation(
            "system_admin cannot be stored as a group role".to_string(),
        ))
    } else if v.is_foreign_key() {
        Some(Error::DanglingReference(format!(
            "user {} or group {} does not exist ({})",
            user_id, group_id, v.constraint
        )))
    } else {
        None
    }
}

#[async_trait]
impl GroupMemberRepository for PgGroupMemberRepository {
    async fn add(&self, user_id: Uuid, group_id: Uuid, role: MemberRole) -> Result<GroupMember> {
        reject_global_role(role)?;
        let now = Utc::now();

        let member = sqlx::query_as::<_, GroupMember>(&format!(
            "INSERT INTO group_members (id, user_id, group_id, role, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(user_id)
        .bind(group_id)
        .bind(role)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err(e, |v| membership_violation(v, user_id, group_id)))?;

        info!(
            subsystem = "db",
            component = "members",
            op = "add",
            user_id = %user_id,
            group_id = %group_id,
            role = %role,
            "Membership added"
        );
        Ok(member)
    }

    async fn set_role(
        &self,
        user_id: Uuid,
        group_id: Uuid,
        role: MemberRole,
    ) -> Result<GroupMember> {
        reject_global_role(role)?;
        let now = Utc::now();

        sqlx::query_as::<_, GroupMember>(&format!(
            "INSERT INTO group_members (id, user_id, group_id, role, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT ON CONSTRAINT {GROUP_MEMBERS_USER_GROUP_KEY}
             DO UPDATE SET role = EXCLUDED.role, updated_at = EXCLUDED.updated_at
             RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(user_id)
        .bind(group_id)
        .bind(role)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err(e, |v| membership_violation(v, user_id, group_id)))
    }

    async fn remove(&self, user_id: Uuid, group_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM group_members WHERE user_id = $1 AND group_id = $2")
            .bind(user_id)
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn role_of(&self, user_id: Uuid, group_id: Uuid) -> Result<Option<MemberRole>> {
        sqlx::query_scalar::<_, MemberRole>(
            "SELECT role FROM group_members WHERE user_id = $1 AND group_id = $2",
        )
        .bind(user_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_for_group(&self, group_id: Uuid) -> Result<Vec<GroupMember>> {
        sqlx::query_as::<_, GroupMember>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members WHERE group_id = $1 ORDER BY created_at"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<GroupMember>> {
        sqlx::query_as::<_, GroupMember>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}
