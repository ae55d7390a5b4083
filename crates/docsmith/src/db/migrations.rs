//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. ALTER TABLE ADD COLUMN migrations are handled
//! conditionally to support idempotent execution against databases that
//! were patched by hand.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    /// Execute the SQL directly.
    Standard,
    /// ALTER TABLE ADD COLUMN: skip if column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_projects_table",
        sql: include_str!("sql/001_create_projects.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_sections_table",
        sql: include_str!("sql/002_create_sections.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_updates_and_recommendations_tables",
        sql: include_str!("sql/003_create_updates_and_recommendations.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_articles_table",
        sql: include_str!("sql/004_create_articles.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "create_update_check_tables",
        sql: include_str!("sql/005_create_update_checks.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 6,
        description: "create_usage_records_table",
        sql: include_str!("sql/006_create_usage_records.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 7,
        description: "add_theme_status_to_projects",
        sql: include_str!("sql/007_add_theme_status.sql"),
        kind: MigrationKind::AddColumn {
            table: "projects",
            column: "theme_status",
        },
    },
    Migration {
        version: 8,
        description: "add_theme_prompt_to_projects",
        sql: include_str!("sql/008_add_theme_prompt.sql"),
        kind: MigrationKind::AddColumn {
            table: "projects",
            column: "theme_prompt",
        },
    },
    Migration {
        version: 9,
        description: "add_custom_css_to_projects",
        sql: include_str!("sql/009_add_custom_css.sql"),
        kind: MigrationKind::AddColumn {
            table: "projects",
            column: "custom_css",
        },
    },
    Migration {
        version: 10,
        description: "create_status_claims_table",
        sql: include_str!("sql/010_create_status_claims.sql"),
        kind: MigrationKind::Standard,
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let should_run = match &migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(conn, table, column)?,
        };

        if should_run {
            conn.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::info!(
                "Skipping migration v{} (column already present)",
                migration.version
            );
        }

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

/// Checks whether a column exists on a table using `PRAGMA table_info`.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = fresh();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_add_column_skipped_when_present() {
        let conn = fresh();
        // Apply only the base tables, then add a theme column by hand.
        conn.execute_batch(include_str!("sql/001_create_projects.sql"))
            .unwrap();
        conn.execute_batch("ALTER TABLE projects ADD COLUMN custom_css TEXT;")
            .unwrap();

        // The remaining migrations must not fail on the duplicate column.
        run_all(&conn).unwrap();
        assert!(column_exists(&conn, "projects", "custom_css").unwrap());
    }

    #[test]
    fn test_column_exists_check() {
        let conn = fresh();
        conn.execute_batch("CREATE TABLE test_tbl (id TEXT, name TEXT);")
            .unwrap();

        assert!(column_exists(&conn, "test_tbl", "id").unwrap());
        assert!(!column_exists(&conn, "test_tbl", "missing").unwrap());
        assert!(column_exists(&conn, "bad;table", "id").is_err());
    }

    #[test]
    fn test_projects_table_has_theme_columns() {
        let conn = fresh();
        run_all(&conn).unwrap();

        for column in ["theme_status", "theme_prompt", "custom_css"] {
            assert!(column_exists(&conn, "projects", column).unwrap(), "{column}");
        }
    }

    #[test]
    fn test_usage_records_have_no_project_foreign_key() {
        let conn = fresh();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO usage_records (id, project_id, job_type, success, created_at)
             VALUES ('u1', 'missing-project', 'analyze-commit', 0, '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }
}
