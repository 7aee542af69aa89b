//! Enum value removal applied to a real schema.
//!
//! Requires a PostgreSQL database:
//! `DATABASE_URL=... cargo test -p lectern-db -- --ignored`

use std::fs;

use lectern_db::migrations::journal::{JournalEntry, JOURNAL_VERSION};
use lectern_db::test_fixtures::ScratchSchema;
use lectern_db::{EnumValueRemoval, Journal, MigrationRunner};
use tempfile::TempDir;

const SETUP: &str = r#"CREATE TYPE "member_role" AS ENUM ('system_admin', 'group_admin', 'teacher', 'student');
--> statement-breakpoint
CREATE TABLE "group_members" (
	"id" serial PRIMARY KEY,
	"group_id" int NOT NULL,
	"role" "member_role" DEFAULT 'student' NOT NULL,
	CONSTRAINT "group_members_no_system_admin" CHECK ("role" <> 'system_admin'),
	CONSTRAINT "group_members_role_known" CHECK ("role" IN ('group_admin', 'teacher', 'student'))
);
--> statement-breakpoint
CREATE INDEX "group_members_teachers_idx" ON "group_members" ("group_id") WHERE "role" = 'teacher';
--> statement-breakpoint
INSERT INTO "group_members" ("group_id", "role") VALUES (1, 'teacher'), (1, 'student'), (2, 'group_admin');
"#;

fn journal_for(dir: &TempDir, scripts: &[(&str, &str)]) -> Journal {
    let mut journal = Journal::empty();
    for (i, (tag, sql)) in scripts.iter().enumerate() {
        fs::write(dir.path().join(format!("{}.sql", tag)), sql).unwrap();
        journal.entries.push(JournalEntry {
            idx: i as u32,
            version: JOURNAL_VERSION.to_string(),
            when: 1_760_000_000_000,
            tag: tag.to_string(),
            breakpoints: true,
        });
    }
    journal
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_removal_survives_dependent_check_and_index() {
    let scratch = ScratchSchema::new("enum_drop").await;
    let removal = EnumValueRemoval::new(
        "member_role",
        "system_admin",
        "group_admin",
        vec![
            "group_admin".to_string(),
            "teacher".to_string(),
            "student".to_string(),
        ],
    )
    .column_with_default("group_members", "role", "student")
    .drop_check("group_members", "group_members_no_system_admin")
    .check(
        "group_members",
        "group_members_role_known",
        r#""role" IN ('group_admin', 'teacher', 'student')"#,
    )
    .index(
        "group_members_teachers_idx",
        r#"CREATE INDEX "group_members_teachers_idx" ON "group_members" ("group_id") WHERE "role" = 'teacher'"#,
    );
    let drop_sql = removal.to_sql().unwrap();

    let tmp = TempDir::new().unwrap();
    let journal = journal_for(
        &tmp,
        &[
            ("0000_roles", SETUP),
            ("0001_drop_system_admin", drop_sql.as_str()),
        ],
    );
    let report = MigrationRunner::new(scratch.pool.clone(), tmp.path(), journal)
        .run()
        .await
        .unwrap();
    assert_eq!(report.applied.len(), 2);

    let values: String = sqlx::query_scalar("SELECT enum_range(NULL::member_role)::text")
        .fetch_one(&scratch.pool)
        .await
        .unwrap();
    assert_eq!(values, "{group_admin,teacher,student}");

    let constraints: Vec<String> = sqlx::query_scalar(
        "SELECT conname::text FROM pg_constraint
         WHERE conrelid = 'group_members'::regclass AND contype = 'c'
         ORDER BY conname",
    )
    .fetch_all(&scratch.pool)
    .await
    .unwrap();
    assert_eq!(constraints, vec!["group_members_role_known"]);

    let index_exists: bool =
        sqlx::query_scalar("SELECT to_regclass('group_members_teachers_idx') IS NOT NULL")
            .fetch_one(&scratch.pool)
            .await
            .unwrap();
    assert!(index_exists);

    let teachers: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE role = 'teacher'")
            .fetch_one(&scratch.pool)
            .await
            .unwrap();
    assert_eq!(teachers, 1);

    let default_role: String = sqlx::query_scalar(
        "INSERT INTO group_members (group_id) VALUES (3) RETURNING role::text",
    )
    .fetch_one(&scratch.pool)
    .await
    .unwrap();
    assert_eq!(default_role, "student");

    scratch.cleanup().await;
}
