//! Migration tooling: journal, journal-sync validator, runner and the
//! enum value removal generator.
//!
//! Migration scripts live in a directory as `NNNN_tag.sql` files, with a
//! journal at `meta/_journal.json` listing one entry per script. The
//! validator compares the two before anything touches the database; the
//! runner then hands pending scripts to sqlx's migrator, one transaction
//! per script.

pub mod enum_removal;
pub mod journal;
pub mod runner;
pub mod validator;

use std::path::{Path, PathBuf};

use sqlx::migrate::MigrateError;
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;

use crate::pool::{create_pool_with_config, PoolConfig};

pub use enum_removal::{DependentCheck, DependentIndex, EnumColumn, EnumValueRemoval};
pub use journal::{scan_scripts, Journal, JournalEntry, ScriptFile};
pub use runner::{MigrationRunner, MigrationState, RunReport, StatusLine, TRACKING_TABLE};
pub use validator::{GateDecision, JournalValidator, ValidationOutcome};

/// Command that regenerates the journal from the scripts on disk.
pub const REBUILD_COMMAND: &str = "lectern-migrate journal rebuild";

/// Default scripts directory, relative to the working directory.
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Journal location relative to the scripts directory.
pub const JOURNAL_RELATIVE_PATH: &str = "meta/_journal.json";

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_MIGRATIONS_DIR: &str = "MIGRATIONS_DIR";
pub const ENV_MIGRATIONS_JOURNAL: &str = "MIGRATIONS_JOURNAL";
pub const ENV_SKIP_VALIDATION: &str = "SKIP_MIGRATION_VALIDATION";

/// Errors raised while configuring, validating or applying migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Missing required setting {0}: set it in the environment or in .env")]
    MissingSetting(&'static str),

    #[error(
        "Migration journal out of sync: found {sql_files} SQL files but {journal_entries} journal entries. \
         Regenerate the journal from the current scripts with `lectern-migrate journal rebuild`"
    )]
    CountMismatch {
        sql_files: usize,
        journal_entries: usize,
    },

    #[error("Cannot read migration journal {path} ({sql_files} SQL files on disk): {source}")]
    JournalUnreadable {
        path: PathBuf,
        sql_files: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration journal {path} is malformed: {source}")]
    JournalMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot write migration journal {path}: {source}")]
    JournalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration journal does not match scripts: {0}. Run `lectern-migrate journal rebuild` after fixing the file names")]
    IdentityMismatch(String),

    #[error("Cannot read migration script {file}: {source}")]
    ScriptRead {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration {file} failed and was rolled back: {source}")]
    ScriptFailed {
        file: String,
        #[source]
        source: MigrateError,
    },

    #[error("Migration {tag} was modified after it was applied; restore the applied script and add a new migration instead")]
    ChecksumMismatch { tag: String },

    #[error("Database records migration version {version}, which no script in the journal provides")]
    UnknownApplied { version: i64 },

    #[error("Migration {tag} was left partially applied by an earlier run; repair it by hand before migrating again")]
    Dirty { tag: String },

    #[error("Cannot connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Migration tracking table error: {0}")]
    Tracking(#[source] MigrateError),

    #[error("Invalid enum value removal: {0}")]
    InvalidEnumRemoval(String),
}

/// Result type for migration tooling.
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

/// Where the scripts and journal live and how to reach the database.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    pub database_url: Option<String>,
    pub migrations_dir: PathBuf,
    pub journal_path: PathBuf,
    pub skip_validation: bool,
}

impl MigrationConfig {
    /// Config for a scripts directory with the journal at its default location.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        let migrations_dir = migrations_dir.into();
        Self {
            database_url: None,
            journal_path: default_journal_path(&migrations_dir),
            migrations_dir,
            skip_validation: false,
        }
    }

    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let dir = lookup(ENV_MIGRATIONS_DIR)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MIGRATIONS_DIR.to_string());
        let mut config = Self::new(dir);

        if let Some(journal) = lookup(ENV_MIGRATIONS_JOURNAL).filter(|v| !v.trim().is_empty()) {
            config.journal_path = PathBuf::from(journal);
        }
        config.database_url = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty());
        config.skip_validation = lookup(ENV_SKIP_VALIDATION)
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        config
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = path.into();
        self
    }

    pub fn with_skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    /// The connection string, or `MissingSetting` naming the variable.
    pub fn database_url(&self) -> MigrationResult<&str> {
        self.database_url
            .as_deref()
            .ok_or(MigrationError::MissingSetting(ENV_DATABASE_URL))
    }

    /// Open a single-connection pool to the configured database.
    pub async fn connect(&self) -> MigrationResult<PgPool> {
        let url = self.database_url()?;
        create_pool_with_config(url, PoolConfig::single())
            .await
            .map_err(|e| match e {
                lectern_core::Error::Database(source) => MigrationError::Connect(source),
                other => MigrationError::Connect(sqlx::Error::Configuration(other.into())),
            })
    }

    pub fn validator(&self) -> JournalValidator {
        JournalValidator::new(&self.migrations_dir, &self.journal_path)
    }

    /// Gate on the journal and load the entries to run.
    ///
    /// Honors `skip_validation`. A fresh directory yields an empty journal.
    /// When validation was bypassed and the journal cannot be read, the
    /// scripts on disk define the order.
    pub fn prepare(&self) -> MigrationResult<(GateDecision, Journal)> {
        let decision = self.validator().gate(self.skip_validation)?;
        if let GateDecision::Passed(ValidationOutcome::Fresh) = decision {
            return Ok((decision, Journal::empty()));
        }

        let journal = match Journal::load(&self.journal_path, 0) {
            Ok(journal) => journal,
            Err(e) if decision.is_bypassed() => {
                warn!(
                    subsystem = "migrations",
                    component = "config",
                    op = "prepare",
                    error = %e,
                    "Journal unusable; ordering migrations by script file names"
                );
                Journal::rebuild_from_dir(&self.migrations_dir, None)?
            }
            Err(e) => return Err(e),
        };
        Ok((decision, journal))
    }
}

/// `<dir>/meta/_journal.json`
pub fn default_journal_path(migrations_dir: &Path) -> PathBuf {
    migrations_dir.join(JOURNAL_RELATIVE_PATH)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
