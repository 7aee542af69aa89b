//! SQL generator for removing a value from a PostgreSQL enum type.
//!
//! PostgreSQL cannot drop an enum value in place. The generated script
//! renames the type aside, creates the reduced type, recasts each column
//! through text and drops the old type. Rows holding the removed value are
//! moved to a substitute first.
//!
//! CHECK constraints and indexes whose expressions mention the type block
//! the recast, so they are dropped up front. Registered with
//! [`EnumValueRemoval::check`] or [`EnumValueRemoval::index`] they are
//! rebuilt against the new type afterwards; [`EnumValueRemoval::drop_check`]
//! drops one for good, for constraints that only existed to forbid the
//! removed value.
//!
//! The output is meant to be pasted into a migration script.

use once_cell::sync::Lazy;
use regex::Regex;

use super::journal::STATEMENT_BREAKPOINT;
use super::{MigrationError, MigrationResult};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("identifier pattern is valid"));

/// A column typed with the enum being reduced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumColumn {
    pub table: String,
    pub column: String,
    /// Column default to restore after the type swap, as an enum value.
    pub default: Option<String>,
}

/// A CHECK constraint that references the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentCheck {
    pub table: String,
    pub name: String,
    /// Expression to re-add after the swap; `None` leaves it dropped.
    pub expression: Option<String>,
}

/// An index whose key or predicate references the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentIndex {
    pub name: String,
    /// Full `CREATE INDEX` statement run after the swap.
    pub definition: String,
}

/// Removal of one value from an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueRemoval {
    type_name: String,
    removed: String,
    substitute: String,
    remaining: Vec<String>,
    columns: Vec<EnumColumn>,
    checks: Vec<DependentCheck>,
    indexes: Vec<DependentIndex>,
}

impl EnumValueRemoval {
    /// `remaining` is the full value list of the reduced type, in order.
    pub fn new(
        type_name: impl Into<String>,
        removed: impl Into<String>,
        substitute: impl Into<String>,
        remaining: Vec<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            removed: removed.into(),
            substitute: substitute.into(),
            remaining,
            columns: Vec::new(),
            checks: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Register a column that uses the type.
    pub fn column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push(EnumColumn {
            table: table.into(),
            column: column.into(),
            default: None,
        });
        self
    }

    /// Register a column that uses the type and has an enum default.
    pub fn column_with_default(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        self.columns.push(EnumColumn {
            table: table.into(),
            column: column.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Drop a CHECK constraint before the swap and re-add it with `expression`.
    pub fn check(
        mut self,
        table: impl Into<String>,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.checks.push(DependentCheck {
            table: table.into(),
            name: name.into(),
            expression: Some(expression.into()),
        });
        self
    }

    /// Drop a CHECK constraint before the swap without restoring it.
    pub fn drop_check(mut self, table: impl Into<String>, name: impl Into<String>) -> Self {
        self.checks.push(DependentCheck {
            table: table.into(),
            name: name.into(),
            expression: None,
        });
        self
    }

    /// Drop an index before the swap and rebuild it from `definition`.
    pub fn index(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.indexes.push(DependentIndex {
            name: name.into(),
            definition: definition.into(),
        });
        self
    }

    fn validate(&self) -> MigrationResult<()> {
        let invalid =
            |msg: String| -> MigrationResult<()> { Err(MigrationError::InvalidEnumRemoval(msg)) };

        let mut identifiers = vec![self.type_name.as_str()];
        for c in &self.columns {
            identifiers.push(&c.table);
            identifiers.push(&c.column);
        }
        for c in &self.checks {
            identifiers.push(&c.table);
            identifiers.push(&c.name);
        }
        for i in &self.indexes {
            identifiers.push(&i.name);
        }
        if let Some(bad) = identifiers.iter().find(|i| !IDENTIFIER.is_match(i)) {
            return invalid(format!("'{}' is not a plain lowercase identifier", bad));
        }
        if self.columns.is_empty() {
            return invalid("at least one table column must use the type".to_string());
        }
        if self.remaining.is_empty() {
            return invalid("the reduced type needs at least one value".to_string());
        }
        if self.remaining.contains(&self.removed) {
            return invalid(format!("'{}' is still listed as a kept value", self.removed));
        }
        if !self.remaining.contains(&self.substitute) {
            return invalid(format!(
                "substitute '{}' is not one of the kept values",
                self.substitute
            ));
        }
        if let Some(c) = self
            .checks
            .iter()
            .find(|c| matches!(&c.expression, Some(e) if e.trim().is_empty()))
        {
            return invalid(format!("check {} has an empty expression", c.name));
        }
        if let Some(i) = self.indexes.iter().find(|i| {
            !i.definition
                .trim_start()
                .to_ascii_uppercase()
                .starts_with("CREATE ")
        }) {
            return invalid(format!(
                "index {} needs a full CREATE INDEX definition",
                i.name
            ));
        }
        for c in &self.columns {
            if let Some(default) = &c.default {
                if !self.remaining.contains(default) {
                    return invalid(format!(
                        "default '{}' for {}.{} is not one of the kept values",
                        default, c.table, c.column
                    ));
                }
            }
        }
        Ok(())
    }

    /// Name the old type is renamed to during the swap.
    pub fn old_type_name(&self) -> String {
        format!("{}_old", self.type_name)
    }

    /// The statements in execution order.
    pub fn statements(&self) -> MigrationResult<Vec<String>> {
        self.validate()?;
        let ty = &self.type_name;
        let old = self.old_type_name();
        let mut out = Vec::new();

        for c in &self.checks {
            out.push(format!(
                "ALTER TABLE \"{}\" DROP CONSTRAINT \"{}\";",
                c.table, c.name
            ));
        }
        for i in &self.indexes {
            out.push(format!("DROP INDEX \"{}\";", i.name));
        }

        for c in &self.columns {
            out.push(format!(
                "UPDATE \"{}\" SET \"{}\" = {} WHERE \"{}\" = {};",
                c.table,
                c.column,
                literal(&self.substitute),
                c.column,
                literal(&self.removed)
            ));
        }

        out.push(format!("ALTER TYPE \"{}\" RENAME TO \"{}\";", ty, old));

        let values: Vec<String> = self.remaining.iter().map(|v| literal(v)).collect();
        out.push(format!(
            "CREATE TYPE \"{}\" AS ENUM ({});",
            ty,
            values.join(", ")
        ));

        for c in &self.columns {
            if c.default.is_some() {
                out.push(format!(
                    "ALTER TABLE \"{}\" ALTER COLUMN \"{}\" DROP DEFAULT;",
                    c.table, c.column
                ));
            }
            out.push(format!(
                "ALTER TABLE \"{}\" ALTER COLUMN \"{}\" TYPE \"{}\" USING \"{}\"::text::\"{}\";",
                c.table, c.column, ty, c.column, ty
            ));
            if let Some(default) = &c.default {
                out.push(format!(
                    "ALTER TABLE \"{}\" ALTER COLUMN \"{}\" SET DEFAULT {};",
                    c.table,
                    c.column,
                    literal(default)
                ));
            }
        }

        for c in &self.checks {
            if let Some(expression) = &c.expression {
                out.push(format!(
                    "ALTER TABLE \"{}\" ADD CONSTRAINT \"{}\" CHECK ({});",
                    c.table,
                    c.name,
                    expression.trim()
                ));
            }
        }
        for i in &self.indexes {
            let definition = i.definition.trim().trim_end_matches(';');
            out.push(format!("{};", definition));
        }

        out.push(format!("DROP TYPE \"{}\";", old));
        Ok(out)
    }

    /// Statements joined with breakpoints, ready for a migration script.
    pub fn to_sql(&self) -> MigrationResult<String> {
        let joined = self
            .statements()?
            .join(&format!("\n{}\n", STATEMENT_BREAKPOINT));
        Ok(format!("{}\n", joined))
    }
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_system_admin() -> EnumValueRemoval {
        EnumValueRemoval::new(
            "member_role",
            "system_admin",
            "group_admin",
            vec![
                "group_admin".to_string(),
                "teacher".to_string(),
                "student".to_string(),
            ],
        )
        .column("group_members", "role")
    }

    #[test]
    fn test_four_steps_in_order() {
        let stmts = drop_system_admin().statements().unwrap();
        assert_eq!(
            stmts,
            vec![
                "UPDATE \"group_members\" SET \"role\" = 'group_admin' WHERE \"role\" = 'system_admin';",
                "ALTER TYPE \"member_role\" RENAME TO \"member_role_old\";",
                "CREATE TYPE \"member_role\" AS ENUM ('group_admin', 'teacher', 'student');",
                "ALTER TABLE \"group_members\" ALTER COLUMN \"role\" TYPE \"member_role\" USING \"role\"::text::\"member_role\";",
                "DROP TYPE \"member_role_old\";",
            ]
        );
    }

    #[test]
    fn test_default_is_dropped_and_restored() {
        let stmts = EnumValueRemoval::new(
            "user_status",
            "pending_verification",
            "active",
            vec!["active".to_string(), "suspended".to_string()],
        )
        .column_with_default("users", "status", "active")
        .statements()
        .unwrap();

        let drop_at = stmts.iter().position(|s| s.contains("DROP DEFAULT")).unwrap();
        let retype_at = stmts.iter().position(|s| s.contains("USING")).unwrap();
        let set_at = stmts.iter().position(|s| s.contains("SET DEFAULT 'active'")).unwrap();
        assert!(drop_at < retype_at && retype_at < set_at);
    }

    #[test]
    fn test_script_has_one_breakpoint_between_statements() {
        let removal = drop_system_admin();
        let sql = removal.to_sql().unwrap();
        assert_eq!(
            sql.matches(STATEMENT_BREAKPOINT).count() + 1,
            removal.statements().unwrap().len()
        );
    }

    #[test]
    fn test_dependents_dropped_first_and_rebuilt_before_old_type_goes() {
        let stmts = drop_system_admin()
            .drop_check("group_members", "group_members_no_system_admin")
            .check(
                "group_members",
                "group_members_role_known",
                "role IN ('group_admin', 'teacher', 'student')",
            )
            .index(
                "group_members_teachers_idx",
                "CREATE INDEX \"group_members_teachers_idx\" ON \"group_members\" (\"group_id\") WHERE role = 'teacher';",
            )
            .statements()
            .unwrap();

        assert_eq!(
            &stmts[..3],
            &[
                "ALTER TABLE \"group_members\" DROP CONSTRAINT \"group_members_no_system_admin\";",
                "ALTER TABLE \"group_members\" DROP CONSTRAINT \"group_members_role_known\";",
                "DROP INDEX \"group_members_teachers_idx\";",
            ]
        );
        let retype_at = stmts.iter().position(|s| s.contains("USING")).unwrap();
        let readd_at = stmts
            .iter()
            .position(|s| s.contains("ADD CONSTRAINT \"group_members_role_known\""))
            .unwrap();
        let reindex_at = stmts
            .iter()
            .position(|s| s.starts_with("CREATE INDEX"))
            .unwrap();
        assert!(retype_at < readd_at && readd_at < reindex_at);
        assert_eq!(stmts.last().unwrap(), "DROP TYPE \"member_role_old\";");
        assert!(!stmts
            .iter()
            .any(|s| s.contains("ADD CONSTRAINT \"group_members_no_system_admin\"")));
        assert!(stmts[reindex_at].ends_with("'teacher';"));
        assert!(!stmts[reindex_at].ends_with(";;"));
    }

    #[test]
    fn test_rejects_bad_dependents() {
        let empty_check = drop_system_admin().check("group_members", "c", "  ");
        assert!(empty_check.statements().is_err());

        let bare_index = drop_system_admin().index("idx", "ON group_members (role)");
        assert!(bare_index.statements().is_err());

        let bad_name = drop_system_admin().drop_check("group_members", "Bad-Name");
        assert!(bad_name.statements().is_err());
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        let kept_removed = EnumValueRemoval::new(
            "member_role",
            "teacher",
            "student",
            vec!["teacher".to_string(), "student".to_string()],
        )
        .column("group_members", "role");
        assert!(kept_removed.statements().is_err());

        let bad_substitute = EnumValueRemoval::new(
            "member_role",
            "teacher",
            "principal",
            vec!["student".to_string()],
        )
        .column("group_members", "role");
        assert!(bad_substitute.statements().is_err());
    }

    #[test]
    fn test_rejects_unsafe_identifiers_and_missing_columns() {
        let injected = EnumValueRemoval::new("x\"; DROP TABLE users; --", "a", "b", vec!["b".into()])
            .column("t", "c");
        assert!(matches!(
            injected.statements(),
            Err(MigrationError::InvalidEnumRemoval(_))
        ));

        let no_columns = EnumValueRemoval::new("t", "a", "b", vec!["b".into()]);
        assert!(no_columns.statements().is_err());
    }

    #[test]
    fn test_literal_escapes_quotes() {
        assert_eq!(literal("o'brien"), "'o''brien'");
    }
}
