//! Pipeline Events
//!
//! The two callback channels of a run (progress ticks and stage completions)
//! flattened into one event type, plus the reducer that folds them into the
//! per-run view. Progress events only move the step indicator; stage data
//! comes exclusively from `StageComplete`.

use crate::stages::{StageName, StageResult, StageStore};

/// One event emitted by a backend run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The pipeline entered a stage. Carries no payload.
    Progress { stage: StageName },
    /// A stage finished with this result.
    StageComplete {
        stage: StageName,
        result: StageResult,
    },
}

impl PipelineEvent {
    pub fn progress(stage: StageName) -> Self {
        PipelineEvent::Progress { stage }
    }

    pub fn stage_complete(stage: StageName, result: StageResult) -> Self {
        PipelineEvent::StageComplete { stage, result }
    }

    pub fn stage(&self) -> &StageName {
        match self {
            PipelineEvent::Progress { stage } | PipelineEvent::StageComplete { stage, .. } => stage,
        }
    }
}

/// Identifies one run. Events and results whose ticket no longer matches the
/// controller's active ticket are stale and must be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunTicket {
    pub session_id: String,
    pub generation: u64,
}

impl RunTicket {
    pub fn new(session_id: impl Into<String>, generation: u64) -> Self {
        Self {
            session_id: session_id.into(),
            generation,
        }
    }

    pub fn matches(&self, session_id: &str, generation: u64) -> bool {
        self.generation == generation && self.session_id == session_id
    }
}

/// Illustrative step indicator. Never consulted for correctness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressIndicator {
    pub expected: Vec<StageName>,
    pub current: Option<StageName>,
    pub completed: Vec<StageName>,
}

impl ProgressIndicator {
    pub fn new(expected: Vec<StageName>) -> Self {
        Self {
            expected,
            current: None,
            completed: Vec::new(),
        }
    }

    pub fn mark_completed(&mut self, stage: &StageName) {
        if !self.completed.contains(stage) {
            self.completed.push(stage.clone());
        }
        if self.current.as_ref() == Some(stage) {
            self.current = None;
        }
    }

    /// Completed share of the expected stages, 0..=100.
    pub fn percent(&self) -> u8 {
        if self.expected.is_empty() {
            return 0;
        }
        let done = self
            .expected
            .iter()
            .filter(|stage| self.completed.contains(stage))
            .count();
        ((done * 100) / self.expected.len()) as u8
    }
}

/// Per-run state built from events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunView {
    pub stages: StageStore,
    pub progress: ProgressIndicator,
}

impl RunView {
    pub fn new(expected: Vec<StageName>) -> Self {
        Self {
            stages: StageStore::new(),
            progress: ProgressIndicator::new(expected),
        }
    }
}

/// Fold one event into the run view.
///
/// Duplicate stage completions overwrite with the same value, so replaying
/// an event leaves the view unchanged. Out-of-order delivery only changes
/// the order of `progress.completed`.
pub fn fold(mut view: RunView, event: &PipelineEvent) -> RunView {
    match event {
        PipelineEvent::Progress { stage } => {
            if !view.progress.completed.contains(stage) {
                view.progress.current = Some(stage.clone());
            }
        }
        PipelineEvent::StageComplete { stage, result } => {
            view.stages.insert(stage.clone(), result.clone());
            view.progress.mark_completed(stage);
        }
    }
    view
}
