//! Database module for persistent job storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`; the guard is
//! never held across an `.await`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

/// File name of the job database inside the configured data directory.
pub const DATABASE_FILE: &str = "jobs.db";

/// How long SQLite waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 10_000;

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode lets status polling read while
/// the worker writes, and the busy timeout bounds every lock wait.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL; PRAGMA busy_timeout={};",
            BUSY_TIMEOUT_MS
        ))?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens the database file inside a data directory.
    pub fn open_in_dir(dir: &Path) -> Result<Self, DatabaseError> {
        Self::open(&dir.join(DATABASE_FILE))
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Runs synchronous database work on tokio's blocking thread pool.
pub async fn blocking<F, T, E>(work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| E::from(DatabaseError::Blocking(e.to_string())))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_dir(&dir.path().join("nested")).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
            assert_eq!(mode.to_lowercase(), "wal");
            let timeout: u32 = conn.query_row("PRAGMA busy_timeout", [], |r| r.get(0))?;
            assert_eq!(timeout, BUSY_TIMEOUT_MS);
            Ok(())
        })
        .unwrap();
        assert!(dir.path().join("nested").join(DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_blocking_runs_off_the_runtime() {
        let db = Database::open_in_memory().unwrap();
        let count = blocking(move || {
            db.with_conn(|conn| {
                let n: u32 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
                Ok(n)
            })
        })
        .await
        .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_blocking_reports_panics() {
        let res: Result<(), DatabaseError> = blocking(|| panic!("boom")).await;
        assert!(matches!(res, Err(DatabaseError::Blocking(_))));
    }

    #[test]
    fn test_database_is_clone() {
        let db = Database::open_in_memory().unwrap();
        let db2 = db.clone();
        // Both should access the same underlying connection.
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, created_at, status, job_type, model, prompt)
                 VALUES ('t1', '2026-01-01T00:00:00.000000Z', 'pending', 'generate', 'm', 'p')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        db2.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }
}
