//! Ephemeral Tier
//!
//! In-process cache of full snapshots. Lives only as long as the client
//! process and is always consulted before the durable tiers.

use mini_moka::sync::Cache;
use sqlopt_core::SessionSnapshot;

/// Maximum cached snapshots
const MAX_CACHE_ENTRIES: u64 = 128;

/// In-memory snapshot cache keyed by session id.
#[derive(Clone)]
pub struct EphemeralCache {
    cache: Cache<String, SessionSnapshot>,
}

impl EphemeralCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHE_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_entries).build();
        Self { cache }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.cache.get(&session_id.to_string())
    }

    pub fn put(&self, snapshot: SessionSnapshot) {
        self.cache.insert(snapshot.id.clone(), snapshot);
    }
}

impl Default for EphemeralCache {
    fn default() -> Self {
        Self::new()
    }
}
