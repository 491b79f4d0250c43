//! SQLite Local Store
//!
//! Production implementation of `LocalStore` backed by a single SQLite
//! key/value table. Entries survive process restarts.
//!
//! Uses r2d2 connection pooling for thread-safe database access.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use super::local::LocalStore;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::ensure_parent_dir;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// SQLite-backed durable-local tier.
#[derive(Clone)]
pub struct SqliteLocalStore {
    pool: DbPool,
}

impl SqliteLocalStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> AppResult<Self> {
        ensure_parent_dir(path)?;

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// The pool holds a single connection so every call sees the same
    /// in-memory database.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    fn init_schema(&self) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(())
    }
}

impl LocalStore for SqliteLocalStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (key, value, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }
}
