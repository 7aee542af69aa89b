//! Migration journal (`meta/_journal.json`) and script discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MigrationError, MigrationResult};

/// Journal format version written by this tooling.
pub const JOURNAL_VERSION: &str = "7";

/// Dialect recorded in new journals.
pub const JOURNAL_DIALECT: &str = "postgresql";

/// Statement separator inside scripts with `breakpoints = true`.
pub const STATEMENT_BREAKPOINT: &str = "--> statement-breakpoint";

static SCRIPT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})_([A-Za-z0-9_]+)\.sql$").expect("script name pattern is valid")
});

/// The journal document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub version: String,
    pub dialect: String,
    pub entries: Vec<JournalEntry>,
}

/// One registered migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Zero-based position.
    pub idx: u32,
    pub version: String,
    /// Registration time, epoch milliseconds.
    pub when: i64,
    /// Script file stem, e.g. `0003_system_admins`.
    pub tag: String,
    pub breakpoints: bool,
}

impl JournalEntry {
    pub fn file_name(&self) -> String {
        format!("{}.sql", self.tag)
    }
}

/// A migration script found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    /// Numeric prefix.
    pub index: u32,
    /// File stem, matching the journal tag.
    pub tag: String,
    pub path: PathBuf,
}

impl ScriptFile {
    /// Parse a file name following the `NNNN_tag.sql` convention.
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let caps = SCRIPT_NAME.captures(name)?;
        let index = caps.get(1)?.as_str().parse().ok()?;
        let tag = name.strip_suffix(".sql")?.to_string();
        Some(Self {
            index,
            tag,
            path: path.to_path_buf(),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.sql", self.tag)
    }
}

/// List migration scripts in `dir`, ordered by index then name.
///
/// A missing directory is an empty project, not an error. Files that do not
/// follow the naming convention are ignored.
pub fn scan_scripts(dir: &Path) -> MigrationResult<Vec<ScriptFile>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(MigrationError::ScriptRead {
                file: dir.display().to_string(),
                source,
            })
        }
    };

    let mut scripts = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| MigrationError::ScriptRead {
            file: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match ScriptFile::parse(&path) {
            Some(script) => scripts.push(script),
            None => debug!(
                subsystem = "migrations",
                component = "journal",
                file = %path.display(),
                "Ignoring file outside the naming convention"
            ),
        }
    }

    scripts.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.tag.cmp(&b.tag)));
    Ok(scripts)
}

impl Journal {
    pub fn empty() -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            dialect: JOURNAL_DIALECT.to_string(),
            entries: Vec::new(),
        }
    }

    /// Read and parse a journal file.
    ///
    /// Read failures and parse failures are reported as different errors;
    /// `sql_files` is carried into the read failure for context.
    pub fn load(path: &Path, sql_files: usize) -> MigrationResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| {
            MigrationError::JournalUnreadable {
                path: path.to_path_buf(),
                sql_files,
                source,
            }
        })?;
        Self::parse(path, &raw)
    }

    /// Parse journal JSON; `path` only labels the error.
    pub fn parse(path: &Path, raw: &str) -> MigrationResult<Self> {
        serde_json::from_str(raw).map_err(|source| MigrationError::JournalMalformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write as pretty JSON with a trailing newline, creating `meta/` if needed.
    pub fn save(&self, path: &Path) -> MigrationResult<()> {
        let io_err = |source| MigrationError::JournalWrite {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut body = serde_json::to_string_pretty(self).map_err(|source| {
            MigrationError::JournalMalformed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        body.push('\n');
        std::fs::write(path, body).map_err(io_err)
    }

    /// Regenerate entries from the scripts in `dir`.
    ///
    /// Entries are renumbered by position. `when` and `breakpoints` are kept
    /// for tags the previous journal already knew; new tags get the current
    /// time and breakpoints on.
    pub fn rebuild_from_dir(dir: &Path, previous: Option<&Journal>) -> MigrationResult<Self> {
        let scripts = scan_scripts(dir)?;
        let known: HashMap<&str, &JournalEntry> = previous
            .map(|j| j.entries.iter().map(|e| (e.tag.as_str(), e)).collect())
            .unwrap_or_default();

        let mut journal = previous
            .map(|j| Self {
                version: j.version.clone(),
                dialect: j.dialect.clone(),
                entries: Vec::new(),
            })
            .unwrap_or_else(Self::empty);

        let now = Utc::now().timestamp_millis();
        for (position, script) in scripts.iter().enumerate() {
            let prior = known.get(script.tag.as_str());
            journal.entries.push(JournalEntry {
                idx: position as u32,
                version: journal.version.clone(),
                when: prior.map(|e| e.when).unwrap_or(now),
                tag: script.tag.clone(),
                breakpoints: prior.map(|e| e.breakpoints).unwrap_or(true),
            });
        }
        Ok(journal)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
