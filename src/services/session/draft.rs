//! Draft Debouncing
//!
//! Drafts are written after a quiet period. Each session id has at most one
//! pending timer; scheduling again replaces it, so an older draft can never
//! land after a newer one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sqlopt_core::DraftSnapshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::services::persistence::PersistenceCoordinator;

struct PendingDraft {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PendingDrafts {
    next_token: u64,
    by_session: HashMap<String, PendingDraft>,
}

/// Per-session debounced draft writer.
#[derive(Clone)]
pub struct DraftScheduler {
    persistence: PersistenceCoordinator,
    delay: Duration,
    pending: Arc<Mutex<PendingDrafts>>,
}

impl DraftScheduler {
    pub fn new(persistence: PersistenceCoordinator, delay: Duration) -> Self {
        Self {
            persistence,
            delay,
            pending: Arc::new(Mutex::new(PendingDrafts::default())),
        }
    }

    fn lock(pending: &Mutex<PendingDrafts>) -> MutexGuard<'_, PendingDrafts> {
        pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `draft` once `delay` passes without another schedule for the
    /// same session. Without a runtime the draft is written immediately.
    pub fn schedule(&self, session_id: &str, draft: DraftSnapshot) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.cancel(session_id);
                if let Err(e) = self.persistence.write_draft(session_id, &draft) {
                    warn!(session_id = %session_id, error = %e, "Draft write failed");
                }
                return;
            }
        };

        let mut pending = Self::lock(&self.pending);
        if let Some(previous) = pending.by_session.remove(session_id) {
            previous.handle.abort();
        }
        pending.next_token += 1;
        let token = pending.next_token;

        let persistence = self.persistence.clone();
        let shared = Arc::clone(&self.pending);
        let delay = self.delay;
        let id = session_id.to_string();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            // Write under the lock so a concurrent cancel cannot interleave.
            let mut pending = Self::lock(&shared);
            let current = pending
                .by_session
                .get(&id)
                .is_some_and(|entry| entry.token == token);
            if !current {
                return;
            }
            pending.by_session.remove(&id);
            match persistence.write_draft(&id, &draft) {
                Ok(()) => debug!(session_id = %id, "Debounced draft written"),
                Err(e) => warn!(session_id = %id, error = %e, "Draft write failed"),
            }
        });

        pending
            .by_session
            .insert(session_id.to_string(), PendingDraft { token, handle });
    }

    /// Drop the pending draft of a session. Returns whether one was pending.
    pub fn cancel(&self, session_id: &str) -> bool {
        let mut pending = Self::lock(&self.pending);
        match pending.by_session.remove(session_id) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        Self::lock(&self.pending)
            .by_session
            .contains_key(session_id)
    }
}
