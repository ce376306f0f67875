//! Durable relational store.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle. All access is
//! serialized through a `Mutex<Connection>`; multi-statement writes go through
//! [`Database::with_transaction`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, Transaction};

pub mod entity_repo;
pub mod error;
pub mod migrations;
pub mod report_repo;
pub mod user_repo;

pub use error::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the durable store. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the database file, creating parent directories, and
    /// migrates it to the latest schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let db = Self::from_connection(Connection::open(path)?, true)?;
        log::info!("Durable store ready at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?, false)
    }

    /// `":memory:"`, an explicit path, or the default location when unset.
    pub fn open_configured(path: Option<&str>) -> Result<Self, DatabaseError> {
        match path {
            Some(":memory:") => Self::open_in_memory(),
            Some(path) => Self::open(Path::new(path)),
            None => match default_database_path() {
                Some(path) => Self::open(&path),
                None => {
                    log::warn!("No home directory found, using an in-memory database");
                    Self::open_in_memory()
                }
            },
        }
    }

    fn from_connection(conn: Connection, wal: bool) -> Result<Self, DatabaseError> {
        if wal {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let guard = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&guard)
    }

    /// Runs `f` in a transaction that commits only when `f` returns `Ok`.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut guard = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = guard.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Runs `f` on tokio's blocking pool. Async callers go through here so
    /// a slow statement never parks a runtime worker.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))?
    }
}

/// Returns the canonical database path: `~/.finreport/data/finreport.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".finreport").join("data").join("finreport.db"))
}

/// Current time in the column format used by every table.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_count(db: &Database) -> u32 {
        db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap()
    }

    fn insert_user(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO users (id, external_id, created_at, updated_at)
             VALUES (?1, ?1, '2026-01-01', '2026-01-01')",
            [id],
        )?;
        Ok(())
    }

    #[tokio::test]
    async fn test_run_blocking_sees_same_connection() {
        let db = Database::open_in_memory().unwrap();
        db.run_blocking(|db| {
            db.with_conn(|conn| {
                conn.execute_batch("CREATE TABLE scratch (x INTEGER); INSERT INTO scratch VALUES (7);")?;
                Ok(())
            })
        })
        .await
        .unwrap();

        let x: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT x FROM scratch", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(x, 7);
    }

    #[tokio::test]
    async fn test_run_blocking_panic_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.run_blocking(|_| panic!("boom")).await;
        assert!(matches!(result, Err(DatabaseError::Task(_))));
    }

    #[test]
    fn test_in_memory_is_migrated() {
        let db = Database::open_in_memory().unwrap();
        let version = db.with_conn(|conn| migrations::schema_version(conn)).unwrap();
        assert!(version > 0);
    }

    #[test]
    fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let db = Database::open(&path).unwrap();
            db.with_conn(|conn| insert_user(conn, "u1")).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(user_count(&db), 1);
    }

    #[test]
    fn test_configured_memory() {
        let db = Database::open_configured(Some(":memory:")).unwrap();
        assert_eq!(user_count(&db), 0);
    }

    #[test]
    fn test_default_path_layout() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with(".finreport/data/finreport.db"));
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.with_transaction(|tx| {
            insert_user(tx, "u1")?;
            Err(DatabaseError::LockPoisoned)
        });
        assert!(result.is_err());
        assert_eq!(user_count(&db), 0);
    }

    #[test]
    fn test_clones_share_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();
        db.with_conn(|conn| insert_user(conn, "u1")).unwrap();
        assert_eq!(user_count(&other), 1);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        let orphan = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports (id, user_id, title, html, live_version, created_at, updated_at, synced_at)
                 VALUES ('r', 'nobody', 'T', '', 1, 't', 't', 't')",
                [],
            )?;
            Ok(())
        });
        assert!(orphan.is_err());
    }
}
