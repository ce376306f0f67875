//! Schema migrations.
//!
//! Applied versions are recorded in `schema_migrations`. Each pending
//! migration runs in its own transaction together with its bookkeeping row,
//! so a crash never leaves a half-applied version behind. Column additions
//! are skipped when the column is already there.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
    /// `Some((table, column))` for an ADD COLUMN migration.
    adds_column: Option<(&'static str, &'static str)>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users",
        sql: include_str!("sql/001_create_users.sql"),
        adds_column: None,
    },
    Migration {
        version: 2,
        name: "reports_and_sections",
        sql: include_str!("sql/002_create_reports.sql"),
        adds_column: None,
    },
    Migration {
        version: 3,
        name: "entities_and_mentions",
        sql: include_str!("sql/003_create_entities.sql"),
        adds_column: None,
    },
    Migration {
        version: 4,
        name: "report_thread_id",
        sql: include_str!("sql/004_add_thread_id.sql"),
        adds_column: Some(("reports", "thread_id")),
    },
    Migration {
        version: 5,
        name: "deleted_reports",
        sql: include_str!("sql/005_create_deleted_reports.sql"),
        adds_column: None,
    },
];

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let applied = schema_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);

    for migration in pending {
        let tx = conn.unchecked_transaction()?;

        let already_there = match migration.adds_column {
            Some((table, column)) => has_column(&tx, table, column)?,
            None => false,
        };
        if already_there {
            log::debug!("Migration v{} already reflected in schema", migration.version);
        } else {
            log::info!("Applying migration v{} ({})", migration.version, migration.name);
            tx.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        }

        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, super::now_rfc3339()],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}
