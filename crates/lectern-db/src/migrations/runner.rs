//! Migration runner.
//!
//! Journal entries are turned into sqlx [`Migration`]s (version = `idx`,
//! description = tag, SQL = script contents) and applied by sqlx's
//! [`Migrator`]. Each script runs in its own transaction together with its
//! row in `_sqlx_migrations`, so a failed script leaves neither schema
//! changes nor a tracking row behind. An applied script whose checksum no
//! longer matches the file on disk stops the run.
//!
//! The runner never validates the journal itself; callers put
//! [`JournalValidator::gate`](super::JournalValidator::gate) in front of it.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Instant;

use sqlx::error::BoxDynError;
use sqlx::migrate::{Migrate, MigrateError, Migration, MigrationSource, MigrationType, Migrator};
use sqlx::{Pool, Postgres};
use tracing::{debug, info};

use super::journal::{Journal, JournalEntry};
use super::{MigrationError, MigrationResult};

/// Table sqlx records applied migrations in.
pub const TRACKING_TABLE: &str = "_sqlx_migrations";

/// A journal entry with its script loaded from disk.
#[derive(Debug, Clone)]
struct PlannedScript {
    entry: JournalEntry,
    migration: Migration,
}

/// Migrations already read from disk, handed to [`Migrator::new`].
#[derive(Debug)]
struct JournalMigrations(Vec<Migration>);

impl MigrationSource<'static> for JournalMigrations {
    fn resolve(
        self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Migration>, BoxDynError>> + Send + 'static>> {
        Box::pin(async move { Ok(self.0) })
    }
}

/// Per-migration state reported by [`MigrationRunner::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Applied,
    Pending,
    /// Applied, but the script on disk no longer matches the recorded checksum.
    Modified,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("applied"),
            Self::Pending => f.write_str("pending"),
            Self::Modified => f.write_str("MODIFIED since applied"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub tag: String,
    pub state: MigrationState,
}

/// Summary of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Tags applied by this run, in order.
    pub applied: Vec<String>,
    /// Tags that were already recorded.
    pub skipped: Vec<String>,
    /// Rows in the tracking table after the run.
    pub tracked: i64,
}

/// Applies migration scripts to a database.
pub struct MigrationRunner {
    pool: Pool<Postgres>,
    migrations_dir: PathBuf,
    journal: Journal,
}

impl MigrationRunner {
    pub fn new(pool: Pool<Postgres>, migrations_dir: impl Into<PathBuf>, journal: Journal) -> Self {
        Self {
            pool,
            migrations_dir: migrations_dir.into(),
            journal,
        }
    }

    async fn plan(&self) -> MigrationResult<Vec<PlannedScript>> {
        let mut planned = Vec::with_capacity(self.journal.len());
        for entry in &self.journal.entries {
            let file = entry.file_name();
            let sql = tokio::fs::read_to_string(self.migrations_dir.join(&file))
                .await
                .map_err(|source| MigrationError::ScriptRead { file, source })?;
            planned.push(PlannedScript {
                migration: to_migration(entry, sql),
                entry: entry.clone(),
            });
        }
        Ok(planned)
    }

    /// Recorded checksums by version. Creates the tracking table if missing.
    async fn applied(&self) -> MigrationResult<HashMap<i64, Vec<u8>>> {
        let mut conn = self.pool.acquire().await.map_err(MigrationError::Connect)?;
        conn.ensure_migrations_table()
            .await
            .map_err(MigrationError::Tracking)?;
        let rows = conn
            .list_applied_migrations()
            .await
            .map_err(MigrationError::Tracking)?;
        Ok(rows
            .into_iter()
            .map(|m| (m.version, m.checksum.into_owned()))
            .collect())
    }

    /// Translate a migrator failure into the script it concerns.
    async fn explain(&self, err: MigrateError, planned: &[PlannedScript]) -> MigrationError {
        let tag_of = |version: i64| {
            planned
                .iter()
                .find(|s| s.migration.version == version)
                .map(|s| s.entry.tag.clone())
                .unwrap_or_else(|| version.to_string())
        };

        match err {
            MigrateError::VersionMismatch(version) => MigrationError::ChecksumMismatch {
                tag: tag_of(version),
            },
            MigrateError::VersionMissing(version) => MigrationError::UnknownApplied { version },
            MigrateError::Dirty(version) => MigrationError::Dirty {
                tag: tag_of(version),
            },
            other => {
                // Scripts apply in order, so the failed one is the first still unrecorded.
                let recorded = self.applied().await.unwrap_or_default();
                match planned
                    .iter()
                    .find(|s| !recorded.contains_key(&s.migration.version))
                {
                    Some(script) => MigrationError::ScriptFailed {
                        file: script.entry.file_name(),
                        source: other,
                    },
                    None => MigrationError::Tracking(other),
                }
            }
        }
    }

    /// Apply every journal entry not yet recorded.
    pub async fn run(&self) -> MigrationResult<RunReport> {
        let start = Instant::now();
        let planned = self.plan().await?;
        let before = self.applied().await?;

        let source = JournalMigrations(planned.iter().map(|s| s.migration.clone()).collect());
        let mut migrator = Migrator::new(source)
            .await
            .map_err(MigrationError::Tracking)?;
        // Exclusive access during a run is an operational convention.
        migrator.set_locking(false);

        if let Err(err) = migrator.run(&self.pool).await {
            return Err(self.explain(err, &planned).await);
        }

        let after = self.applied().await?;
        let mut report = RunReport {
            tracked: after.len() as i64,
            ..RunReport::default()
        };
        for script in &planned {
            let tag = &script.entry.tag;
            if before.contains_key(&script.migration.version) {
                debug!(
                    subsystem = "migrations",
                    component = "runner",
                    tag = %tag,
                    "Already applied"
                );
                report.skipped.push(tag.clone());
            } else {
                info!(
                    subsystem = "migrations",
                    component = "runner",
                    op = "apply",
                    tag = %tag,
                    "Migration applied"
                );
                report.applied.push(tag.clone());
            }
        }

        info!(
            subsystem = "migrations",
            component = "runner",
            op = "run",
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            tracked = report.tracked,
            duration_ms = start.elapsed().as_millis() as u64,
            "Migration run complete"
        );
        Ok(report)
    }

    /// Applied/pending state of each journal entry. Read-only apart from
    /// creating the tracking table if it is missing.
    pub async fn status(&self) -> MigrationResult<Vec<StatusLine>> {
        let planned = self.plan().await?;
        let applied = self.applied().await?;

        Ok(planned
            .into_iter()
            .map(|script| StatusLine {
                state: state_of(&script.migration, applied.get(&script.migration.version)),
                tag: script.entry.tag,
            })
            .collect())
    }
}

fn to_migration(entry: &JournalEntry, sql: String) -> Migration {
    Migration::new(
        i64::from(entry.idx),
        Cow::Owned(entry.tag.clone()),
        MigrationType::Simple,
        Cow::Owned(sql),
        false,
    )
}

fn state_of(migration: &Migration, recorded: Option<&Vec<u8>>) -> MigrationState {
    match recorded {
        Some(checksum) if checksum[..] == migration.checksum[..] => MigrationState::Applied,
        Some(_) => MigrationState::Modified,
        None => MigrationState::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::journal::JOURNAL_VERSION;

    fn entry(idx: u32, tag: &str) -> JournalEntry {
        JournalEntry {
            idx,
            version: JOURNAL_VERSION.to_string(),
            when: 0,
            tag: tag.to_string(),
            breakpoints: true,
        }
    }

    #[test]
    fn test_entry_becomes_versioned_migration() {
        let m = to_migration(&entry(3, "0003_system_admins"), "SELECT 1;".to_string());
        assert_eq!(m.version, 3);
        assert_eq!(m.description, "0003_system_admins");
        assert_eq!(m.sql, "SELECT 1;");
        assert!(!m.no_tx);
    }

    #[test]
    fn test_state_follows_checksum() {
        let m = to_migration(&entry(0, "0000_a"), "CREATE TABLE a (id int);".to_string());
        let same = m.checksum.to_vec();
        let other = to_migration(&entry(0, "0000_a"), "CREATE TABLE a (id bigint);".to_string())
            .checksum
            .to_vec();

        assert_eq!(state_of(&m, None), MigrationState::Pending);
        assert_eq!(state_of(&m, Some(&same)), MigrationState::Applied);
        assert_eq!(state_of(&m, Some(&other)), MigrationState::Modified);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MigrationState::Pending.to_string(), "pending");
        assert_eq!(MigrationState::Applied.to_string(), "applied");
        assert!(MigrationState::Modified.to_string().starts_with("MODIFIED"));
    }

    #[tokio::test]
    async fn test_source_resolves_in_journal_order() {
        let source = JournalMigrations(vec![
            to_migration(&entry(0, "0000_a"), "SELECT 1;".to_string()),
            to_migration(&entry(1, "0001_b"), "SELECT 2;".to_string()),
        ]);
        let migrator = Migrator::new(source).await.unwrap();
        let versions: Vec<i64> = migrator.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![0, 1]);
    }
}
