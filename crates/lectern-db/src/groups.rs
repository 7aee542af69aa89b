//! Group repository implementation.
//!
//! Hierarchy queries push the ltree operators to PostgreSQL:
//! `<@` (descendant of), `@>` (ancestor of), `~` (lquery match) and
//! `nlevel` (depth). Paths travel as text and are cast at the boundary.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use tracing::{debug, info};
use uuid::Uuid;

use lectern_core::{
    merge_settings, new_v7, CreateGroupRequest, Error, Group, GroupRepository, GroupSettings,
    GroupType, HierarchyPath, Result,
};
use lectern_core::path::MAX_LABEL_LEN;

use crate::constraint::{db_err, map_db_err, GROUPS_PATH_KEY, GROUPS_SLUG_KEY};

const GROUP_COLUMNS: &str = "id, name, slug, group_type, path::text AS path, settings, \
                             created_at, updated_at, deleted_at";

/// PostgreSQL implementation of GroupRepository.
pub struct PgGroupRepository {
    pool: Pool<Postgres>,
}

impl PgGroupRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, predicate: &str, bind: &str) -> Result<Vec<Group>> {
        sqlx::query_as::<_, Group>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups
             WHERE {predicate} AND deleted_at IS NULL
             ORDER BY nlevel(path), path"
        ))
        .bind(bind)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

/// Path for a new group and a check that its depth matches the requested type.
///
/// Slugs that differ only in punctuation (`x-a`, `x_a`) map to the same
/// label; the second such sibling is rejected by `groups_path_key`.
pub fn plan_group_path(
    parent_path: Option<&HierarchyPath>,
    slug: &str,
    group_type: GroupType,
) -> Result<HierarchyPath> {
    let label = HierarchyPath::label_from_slug(slug);
    if label.len() > MAX_LABEL_LEN || !HierarchyPath::new(label.as_str()).is_well_formed() {
        return Err(Error::InvalidInput(format!(
            "slug '{}' does not yield a hierarchy label of 1 to {} characters",
            slug, MAX_LABEL_LEN
        )));
    }
    let path = match parent_path {
        Some(parent) => parent.child(&label),
        None => HierarchyPath::root(&label),
    };

    if path.depth() != group_type.depth() {
        let expected = GroupType::for_depth(path.depth())
            .map(|t| t.to_string())
            .unwrap_or_else(|| "nothing (hierarchy is three levels deep)".to_string());
        return Err(Error::InvariantViolation(format!(
            "a {} belongs at depth {}, but path '{}' has depth {} which expects {}",
            group_type,
            group_type.depth(),
            path,
            path.depth(),
            expected
        )));
    }
    Ok(path)
}

#[async_trait]
impl GroupRepository for PgGroupRepository {
    async fn create(&self, req: CreateGroupRequest) -> Result<Group> {
        let parent = match req.parent_id {
            Some(parent_id) => Some(
                self.get(parent_id)
                    .await?
                    .filter(|g| g.deleted_at.is_none())
                    .ok_or_else(|| {
                        Error::DanglingReference(format!("parent group {}", parent_id))
                    })?,
            ),
            None => None,
        };

        let path = plan_group_path(parent.as_ref().map(|g| &g.path), &req.slug, req.group_type)?;
        let now = Utc::now();

        let group = sqlx::query_as::<_, Group>(&format!(
            "INSERT INTO groups (id, name, slug, group_type, path, settings, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5::ltree, $6, $7, $7)
             RETURNING {GROUP_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(&req.name)
        .bind(&req.slug)
        .bind(req.group_type)
        .bind(path.as_str())
        .bind(Json(&req.settings))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_db_err(e, |v| {
                if v.is_unique(GROUPS_SLUG_KEY) {
                    Some(Error::SlugTaken(req.slug.clone()))
                } else if v.is_unique(GROUPS_PATH_KEY) {
                    Some(Error::PathTaken(path.to_string()))
                } else {
                    None
                }
            })
        })?;

        info!(
            subsystem = "db",
            component = "groups",
            op = "create",
            group_id = %group.id,
            path = %group.path,
            "Group created"
        );
        Ok(group)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Group>> {
        sqlx::query_as::<_, Group>(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Group>> {
        sqlx::query_as::<_, Group>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE slug = $1 AND deleted_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_roots(&self) -> Result<Vec<Group>> {
        self.at_depth(1).await
    }

    async fn descendants_of(&self, path: &HierarchyPath) -> Result<Vec<Group>> {
        self.fetch_where("path <@ $1::ltree", path.as_str()).await
    }

    async fn ancestors_of(&self, path: &HierarchyPath) -> Result<Vec<Group>> {
        self.fetch_where("path @> $1::ltree", path.as_str()).await
    }

    async fn matching(&self, pattern: &str) -> Result<Vec<Group>> {
        self.fetch_where("path ~ $1::lquery", pattern).await
    }

    async fn at_depth(&self, depth: i32) -> Result<Vec<Group>> {
        sqlx::query_as::<_, Group>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups
             WHERE nlevel(path) = $1 AND deleted_at IS NULL
             ORDER BY path"
        ))
        .bind(depth)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn update_settings(&self, id: Uuid, settings: &GroupSettings) -> Result<()> {
        let result =
            sqlx::query("UPDATE groups SET settings = $1, updated_at = $2 WHERE id = $3")
                .bind(Json(settings))
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("group {}", id)));
        }
        Ok(())
    }

    async fn effective_settings(&self, id: Uuid) -> Result<GroupSettings> {
        let group = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("group {}", id)))?;

        // Live strict ancestors, root first, then the group's own document.
        let ancestors = sqlx::query_as::<_, Group>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups
             WHERE path @> $1::ltree AND path <> $1::ltree AND deleted_at IS NULL
             ORDER BY nlevel(path)"
        ))
        .bind(group.path.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(
            subsystem = "db",
            component = "groups",
            op = "effective_settings",
            group_id = %id,
            ancestor_count = ancestors.len(),
            "Merging inherited settings"
        );

        merge_settings(
            ancestors
                .iter()
                .map(|g| &g.settings)
                .chain(std::iter::once(&group.settings)),
        )
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE groups SET deleted_at = $1, updated_at = $1 WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("group {}", id)));
        }
        Ok(())
    }

    async fn hard_delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Paths are not foreign keys, so removing an inner node would strand
        // its subtree. Refuse instead.
        let children: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM groups c, groups g
             WHERE g.id = $1 AND c.path <@ g.path AND c.id <> g.id",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        if children > 0 {
            return Err(Error::InvariantViolation(format!(
                "group {} still has {} descendant group(s)",
                id, children
            )));
        }

        let result = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("group {}", id)));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_root_district() {
        let path = plan_group_path(None, "district1", GroupType::District).unwrap();
        assert_eq!(path.as_str(), "district1");
    }

    #[test]
    fn test_plan_school_under_district() {
        let parent = HierarchyPath::new("district1");
        let path = plan_group_path(Some(&parent), "school2", GroupType::School).unwrap();
        assert_eq!(path.as_str(), "district1.school2");
    }

    #[test]
    fn test_plan_converts_slug_to_label() {
        let parent = HierarchyPath::new("north.lincoln_high");
        let path = plan_group_path(Some(&parent), "math-dept", GroupType::Department).unwrap();
        assert_eq!(path.as_str(), "north.lincoln_high.math_dept");
    }

    #[test]
    fn test_plan_rejects_type_depth_mismatch() {
        let err = plan_group_path(None, "lincoln", GroupType::School).unwrap_err();
        match err {
            Error::InvariantViolation(msg) => {
                assert!(msg.contains("school"));
                assert!(msg.contains("district"));
            }
            other => panic!("Expected InvariantViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_rejects_empty_slug() {
        let err = plan_group_path(None, "", GroupType::District).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_plan_rejects_overlong_slug() {
        let slug = "a".repeat(MAX_LABEL_LEN + 1);
        let err = plan_group_path(None, &slug, GroupType::District).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let longest = "a".repeat(MAX_LABEL_LEN);
        assert!(plan_group_path(None, &longest, GroupType::District).is_ok());
    }

    #[test]
    fn test_punctuation_variants_share_a_path() {
        let parent = HierarchyPath::new("north");
        let dashed = plan_group_path(Some(&parent), "x-a", GroupType::School).unwrap();
        let underscored = plan_group_path(Some(&parent), "x_a", GroupType::School).unwrap();
        assert_eq!(dashed, underscored);
    }

    #[test]
    fn test_plan_rejects_fourth_level() {
        let parent = HierarchyPath::new("a.b.c");
        assert!(plan_group_path(Some(&parent), "d", GroupType::Department).is_err());
    }
}
