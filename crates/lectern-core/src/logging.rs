//! Structured logging field name constants for lectern.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same field names across the
//! repository layer and the migration tooling.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Migration or repository failure requiring operator attention, modified scripts |
//! | WARN  | Bypassed validation, soft anomalies (orphaned forks, saturated pool) |
//! | INFO  | Lifecycle events, per-script application, run summaries |
//! | DEBUG | Decision points, counts, resolved configuration |
//! | TRACE | Per-statement execution |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "migrations", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "validator", "runner", "journal", "groups"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "validate", "apply", "fork", "append"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// User UUID being operated on.
pub const USER_ID: &str = "user_id";

/// Group UUID being operated on.
pub const GROUP_ID: &str = "group_id";

/// Chat session UUID being operated on.
pub const SESSION_ID: &str = "session_id";

/// Migration tag (script file stem).
pub const MIGRATION_TAG: &str = "tag";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of migration scripts found on disk.
pub const SQL_FILES: &str = "sql_files";

/// Number of entries in the migration journal.
pub const JOURNAL_ENTRIES: &str = "journal_entries";

/// Number of scripts applied in a run.
pub const APPLIED: &str = "applied";

/// Number of scripts skipped because they were already applied.
pub const SKIPPED: &str = "skipped";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of open connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error being reported or bypassed.
pub const ERROR: &str = "error";

/// Every field name above. `tracing` macros take field names as literals,
/// so call sites spell them out and this list is the reference.
pub const ALL_FIELDS: &[&str] = &[
    SUBSYSTEM,
    COMPONENT,
    OPERATION,
    USER_ID,
    GROUP_ID,
    SESSION_ID,
    MIGRATION_TAG,
    DURATION_MS,
    SQL_FILES,
    JOURNAL_ENTRIES,
    APPLIED,
    SKIPPED,
    POOL_SIZE,
    POOL_IDLE,
    ERROR,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_unique_snake_case() {
        let mut seen = std::collections::HashSet::new();
        for field in ALL_FIELDS {
            assert!(seen.insert(*field), "duplicate field {}", field);
            assert!(field
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
