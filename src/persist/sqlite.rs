//! SQLite-backed key-value boundary.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use super::{KvStore, PersistResult};

/// SQLite implementation of [`crate::persist::KvStore`].
pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    /// Opens or creates a SQLite-backed store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Milliseconds timestamp of the last write to `key`.
    pub fn updated_ms(&self, key: &str) -> PersistResult<Option<u64>> {
        let ts: Option<i64> = self
            .conn
            .query_row(
                "SELECT updated_ms FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts.map(|v| v as u64))
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> PersistResult<()> {
        self.conn.execute(
            "INSERT INTO kv(key, value, updated_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_ms = excluded.updated_ms",
            params![key, value, now_ms() as i64],
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> PersistResult<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
