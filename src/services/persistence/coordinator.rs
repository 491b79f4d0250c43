//! Persistence Coordinator
//!
//! Routes drafts and snapshots across the three tiers. Reads prefer the
//! closest tier; a remote hit is written back to the local tiers before it
//! is returned. Snapshot writes land locally before the call returns and
//! reach the remote tier from a spawned task.

use std::fmt;
use std::sync::Arc;

use sqlopt_core::{draft_key, snapshot_key, DraftSnapshot, SessionSnapshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::ephemeral::EphemeralCache;
use crate::storage::local::LocalStore;
use crate::storage::remote::{RecentFilter, RemoteStore};
use crate::utils::error::{AppError, AppResult};

/// Tier a snapshot was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Ephemeral,
    Local,
    Remote,
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSource::Ephemeral => write!(f, "ephemeral"),
            SnapshotSource::Local => write!(f, "local"),
            SnapshotSource::Remote => write!(f, "remote"),
        }
    }
}

/// A snapshot together with the tier that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSnapshot {
    pub snapshot: SessionSnapshot,
    pub source: SnapshotSource,
}

/// Handle on the background remote write of one snapshot.
///
/// Dropping the handle does not cancel the write.
#[derive(Debug)]
pub struct RemoteWrite {
    handle: Option<JoinHandle<AppResult<()>>>,
}

impl RemoteWrite {
    fn spawned(handle: JoinHandle<AppResult<()>>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn skipped() -> Self {
        Self { handle: None }
    }

    /// Wait for the remote write to settle.
    pub async fn wait(self) -> AppResult<()> {
        match self.handle {
            Some(handle) => handle
                .await
                .map_err(|e| AppError::internal(format!("Remote write task failed: {}", e)))?,
            None => Err(AppError::internal("No async runtime for remote write")),
        }
    }
}

/// Three-tier persistence for drafts and snapshots.
#[derive(Clone)]
pub struct PersistenceCoordinator {
    ephemeral: EphemeralCache,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
}

impl PersistenceCoordinator {
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_cache(EphemeralCache::new(), local, remote)
    }

    pub fn with_cache(
        ephemeral: EphemeralCache,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            ephemeral,
            local,
            remote,
        }
    }

    /// Store unsaved edits. Local tier only; overwrites the previous draft.
    pub fn write_draft(&self, session_id: &str, draft: &DraftSnapshot) -> AppResult<()> {
        self.local.set(&draft_key(session_id), &draft.to_json()?)?;
        debug!(session_id = %session_id, "Draft written");
        Ok(())
    }

    /// Latest draft of a session. Unreadable drafts count as absent.
    pub fn read_draft(&self, session_id: &str) -> Option<DraftSnapshot> {
        let raw = match self.local.get(&draft_key(session_id)) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to read draft");
                return None;
            }
        };
        match DraftSnapshot::from_json(&raw) {
            Ok(draft) => Some(draft),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Discarding unreadable draft");
                None
            }
        }
    }

    /// Remove the draft entry only. The full snapshot is never touched.
    pub fn clear_draft(&self, session_id: &str) -> AppResult<bool> {
        self.local.delete(&draft_key(session_id))
    }

    /// Write a completed snapshot.
    ///
    /// The ephemeral and local tiers are written before returning. The remote
    /// write runs in the background; its failure is logged and reported
    /// through the returned handle, never rolled back or retried.
    pub fn write_snapshot(&self, snapshot: &SessionSnapshot) -> AppResult<RemoteWrite> {
        snapshot.validate()?;

        self.ephemeral.put(snapshot.clone());
        self.local
            .set(&snapshot_key(&snapshot.id), &snapshot.to_json()?)?;
        info!(session_id = %snapshot.id, "Snapshot written to local tier");

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(session_id = %snapshot.id, "No async runtime; remote write skipped");
                return Ok(RemoteWrite::skipped());
            }
        };

        let remote = Arc::clone(&self.remote);
        let snapshot = snapshot.clone();
        let task = handle.spawn(async move {
            match remote.set(&snapshot).await {
                Ok(()) => {
                    debug!(session_id = %snapshot.id, "Snapshot written to remote tier");
                    Ok(())
                }
                Err(e) => {
                    warn!(session_id = %snapshot.id, error = %e, "Remote snapshot write failed");
                    Err(e)
                }
            }
        });
        Ok(RemoteWrite::spawned(task))
    }

    /// Resolve a session's snapshot: ephemeral, then local, then remote.
    ///
    /// The remote tier is only consulted on a local miss and only when its
    /// probe succeeds. A remote hit is backfilled into both local tiers.
    /// Every failure along the way is treated as a miss.
    pub async fn read_snapshot(&self, session_id: &str) -> Option<ResolvedSnapshot> {
        if let Some(snapshot) = self.ephemeral.get(session_id) {
            return Some(ResolvedSnapshot {
                snapshot,
                source: SnapshotSource::Ephemeral,
            });
        }

        if let Some(snapshot) = self.read_local_snapshot(session_id) {
            self.ephemeral.put(snapshot.clone());
            return Some(ResolvedSnapshot {
                snapshot,
                source: SnapshotSource::Local,
            });
        }

        if !self.remote.is_available().await {
            debug!(session_id = %session_id, "Remote tier unavailable; snapshot miss");
            return None;
        }

        let snapshot = match self.remote.get(session_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Remote snapshot read failed");
                return None;
            }
        };
        if let Err(e) = snapshot.validate() {
            warn!(session_id = %session_id, error = %e, "Ignoring unusable remote snapshot");
            return None;
        }

        self.backfill(&snapshot);
        Some(ResolvedSnapshot {
            snapshot,
            source: SnapshotSource::Remote,
        })
    }

    /// Recent remote snapshots, newest first.
    pub async fn recent_snapshots(&self, filter: &RecentFilter) -> AppResult<Vec<SessionSnapshot>> {
        if !self.remote.is_available().await {
            return Err(AppError::RemoteStatus {
                status: 503,
                body: "remote store unavailable".to_string(),
            });
        }
        self.remote.list_recent(filter).await
    }

    fn read_local_snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let raw = match self.local.get(&snapshot_key(session_id)) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Local snapshot read failed");
                return None;
            }
        };
        match SessionSnapshot::from_json(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Ignoring corrupt local snapshot");
                None
            }
        }
    }

    fn backfill(&self, snapshot: &SessionSnapshot) {
        self.ephemeral.put(snapshot.clone());
        let stored = snapshot
            .to_json()
            .map_err(AppError::from)
            .and_then(|json| self.local.set(&snapshot_key(&snapshot.id), &json));
        match stored {
            Ok(()) => debug!(session_id = %snapshot.id, "Backfilled local tier from remote"),
            Err(e) => warn!(session_id = %snapshot.id, error = %e, "Local backfill failed"),
        }
    }
}
