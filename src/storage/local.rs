//! Durable-Local Tier
//!
//! A synchronous string key/value store, the shape of a browser-local
//! store. Values are JSON text. Writes complete on the caller's turn.
//!
//! ## Implementations
//! - `InMemoryLocalStore` - for development and testing
//! - `SqliteLocalStore` - for production (see local_sqlite.rs)

use std::collections::HashMap;
use std::sync::RwLock;

use crate::utils::error::{AppError, AppResult};

/// Durable-local key/value store.
///
/// Implementations must be thread-safe; the store is keyed by session id so
/// concurrent sessions never share an entry.
pub trait LocalStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> AppResult<()>;

    /// Remove `key`. Returns whether an entry existed.
    fn delete(&self, key: &str) -> AppResult<bool>;
}

/// In-memory implementation of `LocalStore`.
///
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AppError::internal("Local store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::internal("Local store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::internal("Local store lock poisoned"))?;
        Ok(entries.remove(key).is_some())
    }
}
