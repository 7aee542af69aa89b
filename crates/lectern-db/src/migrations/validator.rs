//! Journal-sync validator.
//!
//! Runs entirely on the local filesystem and never opens a database
//! connection, so a broken journal is caught before the database is involved.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};

use super::journal::{scan_scripts, Journal, ScriptFile};
use super::{MigrationError, MigrationResult};

/// Successful validation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Neither scripts nor journal entries exist yet.
    Fresh,
    /// Scripts and journal agree.
    InSync { count: usize },
}

impl ValidationOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Fresh => "No migrations found (fresh project)".to_string(),
            Self::InSync { count } => format!("Journal in sync ({} migrations)", count),
        }
    }

    pub fn migration_count(&self) -> usize {
        match self {
            Self::Fresh => 0,
            Self::InSync { count } => *count,
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// What the runner should do after the validation gate.
#[derive(Debug)]
pub enum GateDecision {
    /// Validation ran and passed.
    Passed(ValidationOutcome),
    /// Validation was bypassed by the operator. Carries the error validation
    /// would have raised, if any.
    Bypassed(Option<MigrationError>),
}

impl GateDecision {
    /// Line printed for the operator.
    pub fn summary(&self) -> String {
        match self {
            Self::Passed(outcome) => outcome.message(),
            Self::Bypassed(None) => {
                "WARNING: validation bypassed (journal would have passed)".to_string()
            }
            Self::Bypassed(Some(err)) => format!("WARNING: validation bypassed: {}", err),
        }
    }

    pub fn is_bypassed(&self) -> bool {
        matches!(self, Self::Bypassed(_))
    }
}

/// Compares the scripts directory against the journal.
#[derive(Debug, Clone)]
pub struct JournalValidator {
    migrations_dir: PathBuf,
    journal_path: PathBuf,
    check_identity: bool,
}

impl JournalValidator {
    pub fn new(migrations_dir: impl AsRef<Path>, journal_path: impl AsRef<Path>) -> Self {
        Self {
            migrations_dir: migrations_dir.as_ref().to_path_buf(),
            journal_path: journal_path.as_ref().to_path_buf(),
            check_identity: true,
        }
    }

    /// Compare counts only; skip the tag/index identity checks.
    pub fn count_only(mut self) -> Self {
        self.check_identity = false;
        self
    }

    /// Validate and return the outcome, or the first problem found.
    pub fn validate(&self) -> MigrationResult<ValidationOutcome> {
        let start = Instant::now();
        let scripts = scan_scripts(&self.migrations_dir)?;

        let journal = if !self.journal_path.exists() && scripts.is_empty() {
            Journal::empty()
        } else {
            Journal::load(&self.journal_path, scripts.len())?
        };

        if scripts.len() != journal.len() {
            return Err(MigrationError::CountMismatch {
                sql_files: scripts.len(),
                journal_entries: journal.len(),
            });
        }

        if self.check_identity {
            check_identity(&scripts, &journal)?;
        }

        let outcome = if scripts.is_empty() {
            ValidationOutcome::Fresh
        } else {
            ValidationOutcome::InSync {
                count: scripts.len(),
            }
        };

        info!(
            subsystem = "migrations",
            component = "validator",
            op = "validate",
            sql_files = scripts.len(),
            journal_entries = journal.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "{}",
            outcome.message()
        );
        Ok(outcome)
    }

    /// Run validation, honoring the bypass flag.
    ///
    /// Without bypass any failure is returned as an error. With bypass the
    /// check still runs, its result is logged at warn level, and the caller
    /// proceeds.
    pub fn gate(&self, bypass: bool) -> MigrationResult<GateDecision> {
        let result = self.validate();
        if !bypass {
            return result.map(GateDecision::Passed);
        }

        let would_fail = result.err();
        match &would_fail {
            Some(err) => warn!(
                subsystem = "migrations",
                component = "validator",
                op = "gate",
                error = %err,
                "WARNING: validation bypassed; migrations will run against an unverified journal"
            ),
            None => warn!(
                subsystem = "migrations",
                component = "validator",
                op = "gate",
                "WARNING: validation bypassed; journal would have passed"
            ),
        }
        Ok(GateDecision::Bypassed(would_fail))
    }
}

fn check_identity(scripts: &[ScriptFile], journal: &Journal) -> MigrationResult<()> {
    for (position, (script, entry)) in scripts.iter().zip(&journal.entries).enumerate() {
        let position = position as u32;
        if script.index != position {
            return Err(MigrationError::IdentityMismatch(format!(
                "script numbering has a gap: expected index {:04} but found {}",
                position,
                script.file_name()
            )));
        }
        if entry.idx != position {
            return Err(MigrationError::IdentityMismatch(format!(
                "journal entry at position {} has idx {}",
                position, entry.idx
            )));
        }
        if entry.tag != script.tag {
            return Err(MigrationError::IdentityMismatch(format!(
                "journal entry {} expects {} but the script at that position is {}",
                entry.idx,
                entry.file_name(),
                script.file_name()
            )));
        }
    }
    Ok(())
}
