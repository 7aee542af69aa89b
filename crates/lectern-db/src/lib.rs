//! # lectern-db
//!
//! PostgreSQL data layer for lectern.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for users, tools, groups, memberships,
//!   chat sessions and messages
//! - Hierarchy queries over `ltree` group paths
//! - Migration journal validation and the migration runner
//!
//! ## Example
//!
//! ```rust,ignore
//! use lectern_db::{CreateGroupRequest, Database, GroupRepository, GroupType, HierarchyPath};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/lectern").await?;
//!
//!     let district = db.groups.create(CreateGroupRequest {
//!         name: "North District".to_string(),
//!         slug: "north".to_string(),
//!         group_type: GroupType::District,
//!         parent_id: None,
//!         settings: Default::default(),
//!     }).await?;
//!
//!     let subtree = db.groups.descendants_of(&HierarchyPath::new("north")).await?;
//!     println!("{} has {} groups", district.name, subtree.len());
//!     Ok(())
//! }
//! ```
pub mod constraint;
pub mod groups;
pub mod members;
pub mod messages;
pub mod migrations;
pub mod pool;
pub mod sessions;
pub mod tools;
pub mod users;

// Always compiled so integration tests (in tests/) can use it.
pub mod test_fixtures;

// Re-export core types
pub use lectern_core::*;

pub use groups::{plan_group_path, PgGroupRepository};
pub use members::PgGroupMemberRepository;
pub use messages::PgMessageRepository;
pub use migrations::{
    EnumValueRemoval, GateDecision, Journal, JournalValidator, MigrationConfig, MigrationError,
    MigrationResult, MigrationRunner, RunReport, ValidationOutcome,
};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig, PoolHealth};
pub use sessions::PgChatSessionRepository;
pub use tools::PgToolRepository;
pub use users::PgUserRepository;

/// Combined database handle with all repositories.
pub struct Database {
    pool: sqlx::Pool<sqlx::Postgres>,
    pub users: PgUserRepository,
    pub tools: PgToolRepository,
    pub groups: PgGroupRepository,
    pub members: PgGroupMemberRepository,
    pub sessions: PgChatSessionRepository,
    pub messages: PgMessageRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            users: PgUserRepository::new(pool.clone()),
            tools: PgToolRepository::new(pool.clone()),
            groups: PgGroupRepository::new(pool.clone()),
            members: PgGroupMemberRepository::new(pool.clone()),
            sessions: PgChatSessionRepository::new(pool.clone()),
            messages: PgMessageRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Validate the journal, then apply pending migrations.
    ///
    /// The journal gate runs before the pool is touched, so an out-of-sync
    /// journal fails without a database round trip unless
    /// `config.skip_validation` is set.
    pub async fn migrate(&self, config: &MigrationConfig) -> MigrationResult<RunReport> {
        let (_, journal) = config.prepare()?;
        MigrationRunner::new(self.pool.clone(), &config.migrations_dir, journal)
            .run()
            .await
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn test_migrate_gates_on_journal_before_touching_pool() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["0000_a.sql", "0001_b.sql"] {
            std::fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }
        let config = MigrationConfig::new(dir.path());
        let mut journal = Journal::rebuild_from_dir(dir.path(), None).unwrap();
        journal.entries.truncate(1);
        journal.save(&config.journal_path).unwrap();

        // Nothing listens here; any connection attempt would fail differently.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://lectern@127.0.0.1:1/unreachable")
            .unwrap();
        let err = Database::new(pool).migrate(&config).await.unwrap_err();

        assert!(matches!(
            err,
            MigrationError::CountMismatch {
                sql_files: 2,
                journal_entries: 1
            }
        ));
    }
}
