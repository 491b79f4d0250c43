//! Session Models
//!
//! The analysis session owned by `SessionController`, its mode, the baseline
//! used for dirty tracking, and the change notifications sent to the UI.

use serde::{Deserialize, Serialize};
use sqlopt_core::{
    AnalysisOptions, AnalysisResult, DraftSnapshot, ProgressIndicator, SessionSnapshot,
    StageName, StageResult, StageStore,
};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Session lifecycle mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Query and options are editable; nothing is being analyzed
    Edit,
    /// A run is in flight
    Analyzing,
    /// A completed result is shown
    View,
    /// A run just failed; immediately followed by `Edit`
    Failed,
}

impl SessionMode {
    pub fn allows_edits(&self) -> bool {
        matches!(self, SessionMode::Edit | SessionMode::View)
    }
}

/// Query and options captured at the last successful analysis or load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub query: String,
    pub options: AnalysisOptions,
}

impl Baseline {
    pub fn new(query: impl Into<String>, options: AnalysisOptions) -> Self {
        Self {
            query: query.into(),
            options,
        }
    }

    /// True when either the query or any option differs from the baseline.
    pub fn is_dirty(&self, query: &str, options: &AnalysisOptions) -> bool {
        query != self.query || *options != self.options
    }
}

/// One query-analysis lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub query: String,
    pub options: AnalysisOptions,
    pub mode: SessionMode,
    pub baseline: Baseline,
    pub result: Option<AnalysisResult>,
    pub stages: StageStore,
    pub progress: ProgressIndicator,
    pub dirty: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    /// Empty session in `edit` mode
    pub fn new(id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            query: String::new(),
            options: AnalysisOptions::default(),
            mode: SessionMode::Edit,
            baseline: Baseline::default(),
            result: None,
            stages: StageStore::new(),
            progress: ProgressIndicator::default(),
            dirty: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Empty session under a freshly allocated id
    pub fn fresh() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Session in `view` mode reconstructed from a snapshot
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let mut session = Self::new(snapshot.id);
        session.baseline = Baseline::new(snapshot.query.clone(), snapshot.options.clone());
        session.query = snapshot.query;
        session.options = snapshot.options;
        session.result = Some(snapshot.result);
        session.stages = snapshot.stage_data;
        session.mode = SessionMode::View;
        session.created_at = snapshot.timestamp;
        session.updated_at = snapshot.timestamp;
        session
    }

    /// Session in `edit` mode restored from unsaved edits
    pub fn from_draft(id: impl Into<String>, draft: DraftSnapshot) -> Self {
        let mut session = Self::new(id);
        session.query = draft.query;
        session.options = draft.options;
        session.updated_at = draft.timestamp;
        session.refresh_dirty();
        session
    }

    /// Full snapshot of a completed session; `None` without a usable result.
    pub fn to_snapshot(&self, user_id: Option<&str>) -> Option<SessionSnapshot> {
        let result = self.result.as_ref().filter(|result| !result.is_error())?;
        Some(SessionSnapshot {
            id: self.id.clone(),
            query: self.query.clone(),
            options: self.options.clone(),
            result: result.clone(),
            stage_data: self.stages.clone(),
            timestamp: now_millis(),
            project_id: self.options.project_id.clone(),
            user_id: user_id.map(str::to_string),
        })
    }

    /// Draft of the current edits
    pub fn to_draft(&self) -> DraftSnapshot {
        DraftSnapshot {
            query: self.query.clone(),
            options: self.options.clone(),
            timestamp: now_millis(),
        }
    }

    /// Stage output from the live store, falling back to the copy embedded
    /// in the result. Both are views of the same data.
    pub fn stage(&self, stage: &StageName) -> Option<StageResult> {
        self.stages.get(stage).cloned().or_else(|| {
            self.result
                .as_ref()
                .filter(|result| !result.is_error())
                .and_then(|result| result.stage(stage))
        })
    }

    /// Recompute the dirty flag; returns true when it changed.
    pub fn refresh_dirty(&mut self) -> bool {
        let dirty = self.baseline.is_dirty(&self.query, &self.options);
        let changed = dirty != self.dirty;
        self.dirty = dirty;
        changed
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

/// Change notification broadcast by `SessionController`
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ModeChanged {
        session_id: String,
        from: SessionMode,
        to: SessionMode,
    },
    DirtyChanged {
        session_id: String,
        dirty: bool,
    },
    Progress {
        session_id: String,
        stage: StageName,
    },
    StageCompleted {
        session_id: String,
        stage: StageName,
    },
    /// Non-fatal persistence problem (e.g. the remote tier rejected a write)
    PersistenceWarning {
        session_id: String,
        message: String,
    },
}
