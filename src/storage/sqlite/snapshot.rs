//! In-memory `SQLite` database with a periodically flushed snapshot file.
//!
//! The in-memory database is the source of truth for the process. Writes
//! mark it dirty; [`SnapshotDb::flush_if_dirty`] copies it to disk with
//! `VACUUM INTO` a temporary file followed by an atomic rename, so a crash
//! mid-flush leaves the previous snapshot intact. Unflushed writes are lost
//! on crash.

use super::{
    OpStatus, acquire_lock, acquire_lock_with_timeout, configure_connection,
    record_operation_metrics,
};
use crate::{Error, Result};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Alias under which the snapshot file is attached during load.
const SNAPSHOT_SCHEMA: &str = "snapshot";

/// An in-memory database mirrored to an optional snapshot file.
pub struct SnapshotDb {
    /// Store name used in logs and metric labels.
    name: &'static str,
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    lock_timeout: Duration,
    dirty: AtomicBool,
    last_flush: Mutex<Option<Instant>>,
}

impl SnapshotDb {
    /// Opens a store, creating `schema` and loading `tables` from `path` if it exists.
    ///
    /// A snapshot that cannot be read is logged and ignored; the store then
    /// starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the in-memory database or its
    /// schema cannot be created.
    pub fn open(
        name: &'static str,
        path: Option<PathBuf>,
        schema: &str,
        tables: &[&str],
        lock_timeout: Duration,
    ) -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: format!("open_{name}"),
            cause: e.to_string(),
        })?;
        configure_connection(&conn);
        conn.execute_batch(schema)
            .map_err(|e| Error::OperationFailed {
                operation: format!("create_{name}_schema"),
                cause: e.to_string(),
            })?;

        if let Some(ref snapshot) = path {
            if snapshot.exists() {
                match load_snapshot(&mut conn, snapshot, tables) {
                    Ok(()) => tracing::info!(store = name, path = %snapshot.display(), "Loaded snapshot"),
                    Err(e) => tracing::warn!(
                        store = name,
                        path = %snapshot.display(),
                        error = %e,
                        "Failed to load snapshot, starting empty"
                    ),
                }
            }
        }

        Ok(Self {
            name,
            conn: Mutex::new(conn),
            path,
            lock_timeout,
            dirty: AtomicBool::new(false),
            last_flush: Mutex::new(None),
        })
    }

    /// Returns the snapshot path (None for purely in-memory stores).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the store name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if there are writes not yet flushed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Runs a read-only closure under the store lock.
    pub fn read<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let start = Instant::now();
        let conn = acquire_lock_with_timeout(self.name, &self.conn, self.lock_timeout)?;
        let result = f(&*conn);
        drop(conn);
        self.finish(operation, start, result)
    }

    /// Runs a mutating closure under the store lock and marks the store dirty.
    pub fn write<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let start = Instant::now();
        let mut conn = acquire_lock_with_timeout(self.name, &self.conn, self.lock_timeout)?;
        let result = f(&mut *conn);
        if result.is_ok() {
            self.dirty.store(true, Ordering::Release);
        }
        drop(conn);
        self.finish(operation, start, result)
    }

    fn finish<T>(
        &self,
        operation: &'static str,
        start: Instant,
        result: rusqlite::Result<T>,
    ) -> Result<T> {
        record_operation_metrics(self.name, operation, start, OpStatus::of(&result));
        result.map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: e.to_string(),
        })
    }

    /// Flushes if dirty and at least `min_interval` has passed since the last flush.
    ///
    /// Returns `true` if a flush happened.
    pub fn flush_if_dirty(&self, min_interval: Duration) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }

        let last_flush = *acquire_lock(self.name, &self.last_flush);
        let recently_flushed = last_flush.is_some_and(|last| last.elapsed() < min_interval);
        if recently_flushed {
            return Ok(false);
        }

        self.flush_now()?;
        Ok(true)
    }

    /// Writes the snapshot unconditionally.
    ///
    /// On failure the store stays dirty so a later flush retries.
    pub fn flush_now(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };

        let start = Instant::now();
        let result = self.write_snapshot(path);
        record_operation_metrics(self.name, "flush", start, OpStatus::of(&result));

        match result {
            Ok(()) => {
                *acquire_lock(self.name, &self.last_flush) = Some(Instant::now());
                tracing::debug!(store = self.name, path = %path.display(), "Flushed snapshot");
                Ok(())
            },
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                tracing::warn!(store = self.name, error = %e, "Snapshot flush failed");
                Err(e)
            },
        }
    }

    fn write_snapshot(&self, path: &Path) -> Result<()> {
        let io_error = |operation: &str, e: std::io::Error| Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("{}: {e}", path.display()),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error("create_snapshot_dir", e))?;
        }

        let tmp = path.with_extension("tmp");
        if tmp.exists() {
            std::fs::remove_file(&tmp).map_err(|e| io_error("remove_stale_snapshot", e))?;
        }

        {
            let conn = acquire_lock_with_timeout(self.name, &self.conn, self.lock_timeout)?;
            // Cleared under the lock: writers set it while holding the same lock.
            self.dirty.store(false, Ordering::Release);
            conn.execute("VACUUM INTO ?1", params![tmp.to_string_lossy()])
                .map_err(|e| Error::OperationFailed {
                    operation: "vacuum_into_snapshot".to_string(),
                    cause: e.to_string(),
                })?;
        }

        std::fs::rename(&tmp, path).map_err(|e| io_error("rename_snapshot", e))
    }
}

/// Copies `tables` from the snapshot file into the in-memory database.
fn load_snapshot(conn: &mut Connection, path: &Path, tables: &[&str]) -> rusqlite::Result<()> {
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {SNAPSHOT_SCHEMA}"),
        params![path.to_string_lossy()],
    )?;

    let copied = copy_tables(conn, tables);
    let detached = conn.execute(&format!("DETACH DATABASE {SNAPSHOT_SCHEMA}"), []);

    copied?;
    detached.map(|_| ())
}

fn copy_tables(conn: &mut Connection, tables: &[&str]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    for table in tables {
        tx.execute(
            &format!("INSERT OR REPLACE INTO main.{table} SELECT * FROM {SNAPSHOT_SCHEMA}.{table}"),
            [],
        )?;
    }
    // AUTOINCREMENT high-water marks; absent when no table uses AUTOINCREMENT.
    let _ = tx.execute(
        &format!(
            "UPDATE main.sqlite_sequence SET seq = (
                SELECT s.seq FROM {SNAPSHOT_SCHEMA}.sqlite_sequence s
                WHERE s.name = main.sqlite_sequence.name
             )
             WHERE EXISTS (
                SELECT 1 FROM {SNAPSHOT_SCHEMA}.sqlite_sequence s
                WHERE s.name = main.sqlite_sequence.name AND s.seq > main.sqlite_sequence.seq
             )"
        ),
        [],
    );
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        value TEXT NOT NULL
    );";

    fn open(path: Option<PathBuf>) -> SnapshotDb {
        SnapshotDb::open("test_store", path, SCHEMA, &["items"], Duration::from_secs(1)).unwrap()
    }

    fn insert(db: &SnapshotDb, value: &str) {
        db.write("insert", |conn| {
            conn.execute("INSERT INTO items (value) VALUES (?1)", params![value])
        })
        .unwrap();
    }

    fn count(db: &SnapshotDb) -> i64 {
        db.read("count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
        })
        .unwrap()
    }

    #[test]
    fn test_write_marks_dirty() {
        let db = open(None);
        assert!(!db.is_dirty());
        insert(&db, "a");
        assert!(db.is_dirty());
        db.flush_now().unwrap();
        assert!(!db.is_dirty());
    }

    #[test]
    fn test_failed_write_leaves_clean() {
        let db = open(None);
        let result = db.write("bad", |conn| conn.execute("INSERT INTO missing VALUES (1)", []));
        assert!(matches!(result, Err(Error::OperationFailed { ref operation, .. }) if operation == "bad"));
        assert!(!db.is_dirty());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let db = open(Some(path.clone()));
        insert(&db, "a");
        insert(&db, "b");
        assert!(db.flush_if_dirty(Duration::ZERO).unwrap());
        assert!(path.exists());
        drop(db);

        let reopened = open(Some(path));
        assert_eq!(count(&reopened), 2);
        assert!(!reopened.is_dirty());
    }

    #[test]
    fn test_autoincrement_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");

        let db = open(Some(path.clone()));
        insert(&db, "a");
        insert(&db, "b");
        db.write("delete", |conn| conn.execute("DELETE FROM items WHERE id = 2", []))
            .unwrap();
        db.flush_now().unwrap();
        drop(db);

        let reopened = open(Some(path));
        insert(&reopened, "c");
        let max_id: i64 = reopened
            .read("max", |conn| conn.query_row("SELECT MAX(id) FROM items", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(max_id, 3);
    }

    #[test]
    fn test_min_interval_throttles_flush() {
        let dir = TempDir::new().unwrap();
        let db = open(Some(dir.path().join("store.db")));

        insert(&db, "a");
        assert!(db.flush_if_dirty(Duration::from_secs(60)).unwrap());
        insert(&db, "b");
        assert!(!db.flush_if_dirty(Duration::from_secs(60)).unwrap());
        assert!(db.is_dirty());
        assert!(db.flush_if_dirty(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_clean_store_skips_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        let db = open(Some(path.clone()));
        assert!(!db.flush_if_dirty(Duration::ZERO).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        std::fs::write(&path, b"definitely not sqlite").unwrap();

        let db = open(Some(path));
        assert_eq!(count(&db), 0);
    }
}
