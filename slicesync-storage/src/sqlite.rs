//! SQLite-backed store.
//!
//! One table, one row per key. Several processes may open the same file;
//! SQLite's own locking serializes their writes.

use crate::error::{StorageError, StorageResult};
use crate::KeyValueStore;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Persistent store backed by a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!("opened slice store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM kv")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}
