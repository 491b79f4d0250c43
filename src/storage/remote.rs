//! Durable-Remote Tier
//!
//! Best-effort remote document store for full snapshots. Calls may fail or
//! time out; callers treat every failure as non-fatal.
//!
//! ## Implementations
//! - `InMemoryRemoteStore` - for development and testing
//! - `HttpRemoteStore` - for production (see remote_http.rs)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlopt_core::SessionSnapshot;
use tokio::sync::RwLock;

use crate::utils::error::{AppError, AppResult};

/// Default number of entries returned by `list_recent`
const DEFAULT_RECENT_LIMIT: usize = 10;

/// Hard cap on entries returned by `list_recent`
const MAX_RECENT_LIMIT: usize = 100;

/// Filter for listing recent snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

impl Default for RecentFilter {
    fn default() -> Self {
        Self {
            project_id: None,
            user_id: None,
            limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl RecentFilter {
    /// Limit clamped to 1..=100
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_RECENT_LIMIT)
    }

    pub fn matches(&self, snapshot: &SessionSnapshot) -> bool {
        let project_ok = self
            .project_id
            .as_ref()
            .map_or(true, |id| snapshot.project_id.as_ref() == Some(id));
        let user_ok = self
            .user_id
            .as_ref()
            .map_or(true, |id| snapshot.user_id.as_ref() == Some(id));
        project_ok && user_ok
    }
}

/// Remote snapshot store keyed by session id.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap reachability check with a bounded timeout.
    async fn is_available(&self) -> bool;

    /// Fetch the snapshot for a session.
    async fn get(&self, session_id: &str) -> AppResult<Option<SessionSnapshot>>;

    /// Store a snapshot, replacing any previous one for the same session.
    async fn set(&self, snapshot: &SessionSnapshot) -> AppResult<()>;

    /// Remove a session's snapshot. Returns whether one existed.
    async fn delete(&self, session_id: &str) -> AppResult<bool>;

    /// Most recent snapshots first, filtered and capped by `filter`.
    async fn list_recent(&self, filter: &RecentFilter) -> AppResult<Vec<SessionSnapshot>>;
}

/// In-memory implementation of `RemoteStore`.
///
/// Can be switched offline or made to reject writes to exercise the
/// degraded paths of the persistence coordinator.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    snapshots: RwLock<HashMap<String, SessionSnapshot>>,
    offline: AtomicBool,
    reject_writes: AtomicBool,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Successful `set` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// `get` calls so far, successful or not
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> AppResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::RemoteStatus {
                status: 503,
                body: "remote store offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn is_available(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn get(&self, session_id: &str) -> AppResult<Option<SessionSnapshot>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(session_id).cloned())
    }

    async fn set(&self, snapshot: &SessionSnapshot) -> AppResult<()> {
        self.ensure_online()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(AppError::RemoteStatus {
                status: 500,
                body: "write rejected".to_string(),
            });
        }
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.id.clone(), snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> AppResult<bool> {
        self.ensure_online()?;
        let mut snapshots = self.snapshots.write().await;
        Ok(snapshots.remove(session_id).is_some())
    }

    async fn list_recent(&self, filter: &RecentFilter) -> AppResult<Vec<SessionSnapshot>> {
        self.ensure_online()?;
        let snapshots = self.snapshots.read().await;
        let mut matching: Vec<SessionSnapshot> = snapshots
            .values()
            .filter(|snapshot| filter.matches(snapshot))
            .cloned()
            .collect();
        // Newest first
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(filter.effective_limit());
        Ok(matching)
    }
}
