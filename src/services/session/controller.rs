//! Session Controller
//!
//! Owns the active analysis session and drives it through its modes:
//!
//! ```text
//! edit ──start──▶ analyzing ──ok──▶ view ──begin_edit──▶ edit
//!                     │                                    ▲
//!                     └──error──▶ failed ──────────────────┘
//! edit ──cancel_edit (completed result)──▶ view
//! ```
//!
//! Each run carries a `RunTicket`; events and results whose ticket is no
//! longer the active one are dropped before they touch session state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sqlopt_core::{
    fold, merge, AnalysisError, AnalysisOptions, AnalysisRequest, AnalysisResult, ErrorKind,
    PipelineEvent, ProgressIndicator, RunTicket, RunView, SessionSnapshot, StageName, StageResult,
    StageStore,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::draft::DraftScheduler;
use crate::models::session::{Session, SessionEvent, SessionMode};
use crate::models::settings::ClientConfig;
use crate::services::backend::{
    BackendConnector, HttpBackend, HttpBackendConfig, LocalSimulation, PipelineConnector,
    PipelineSink, TaggedEvent,
};
use crate::services::persistence::PersistenceCoordinator;
use crate::storage::local_sqlite::SqliteLocalStore;
use crate::storage::remote_http::HttpRemoteStore;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::sessions_db_path;

/// Buffered change notifications per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How one `start_analysis` call ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The session reached `view` with a result
    Completed,
    /// The run failed; the session is back in `edit`
    Failed(ErrorKind),
    /// A run was already in flight; nothing was started
    Skipped,
    /// The session was replaced before the run ended; its result was dropped
    Superseded,
}

struct ActiveRun {
    ticket: RunTicket,
    cancel: CancellationToken,
}

struct ControllerState {
    session: Session,
    generation: u64,
    active_run: Option<ActiveRun>,
}

impl ControllerState {
    fn is_current(&self, ticket: &RunTicket) -> bool {
        self.active_run
            .as_ref()
            .is_some_and(|run| run.ticket == *ticket)
            && ticket.matches(&self.session.id, self.generation)
    }

    /// Abandon the in-flight run, if any, and invalidate its ticket.
    fn supersede(&mut self) -> u64 {
        self.generation += 1;
        if let Some(run) = self.active_run.take() {
            debug!(
                session_id = %run.ticket.session_id,
                generation = run.ticket.generation,
                "Abandoning in-flight run"
            );
            run.cancel.cancel();
        }
        self.generation
    }
}

struct ControllerInner {
    connector: Arc<dyn BackendConnector>,
    persistence: PersistenceCoordinator,
    drafts: DraftScheduler,
    user_id: Option<String>,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<SessionEvent>,
}

/// Cloneable handle on one session state machine.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        persistence: PersistenceCoordinator,
        config: &ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let drafts = DraftScheduler::new(persistence.clone(), config.draft_debounce());
        Self {
            inner: Arc::new(ControllerInner {
                connector,
                persistence,
                drafts,
                user_id: config.user_id.clone(),
                state: Mutex::new(ControllerState {
                    session: Session::fresh(),
                    generation: 0,
                    active_run: None,
                }),
                events,
            }),
        }
    }

    /// Wire the production stack: SQLite local tier, HTTP remote tier and
    /// the HTTP connector with optional simulation fallback.
    pub fn from_config(config: &ClientConfig) -> AppResult<Self> {
        config.validate().map_err(AppError::validation)?;

        let db_path = match &config.local_db_path {
            Some(path) => path.clone(),
            None => sessions_db_path()?,
        };
        let local = Arc::new(SqliteLocalStore::open(&db_path)?);
        let remote = Arc::new(HttpRemoteStore::new(
            config.remote_store_url.clone(),
            config.probe_timeout(),
        )?);
        let persistence = PersistenceCoordinator::new(local, remote);

        let service = Arc::new(HttpBackend::new(HttpBackendConfig::from(config))?);
        let simulation = config
            .simulation_enabled
            .then(|| LocalSimulation::new(config.simulation_step()));
        let connector = Arc::new(PipelineConnector::new(service, simulation));

        info!(
            backend_url = %config.backend_url,
            db_path = %db_path.display(),
            simulation = config.simulation_enabled,
            "Session controller ready"
        );
        Ok(Self::new(connector, persistence, config))
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn set_mode(&self, state: &mut ControllerState, to: SessionMode) {
        let from = state.session.mode;
        if from == to {
            return;
        }
        state.session.mode = to;
        debug!(session_id = %state.session.id, ?from, ?to, "Mode changed");
        self.emit(SessionEvent::ModeChanged {
            session_id: state.session.id.clone(),
            from,
            to,
        });
    }

    fn refresh_dirty(&self, state: &mut ControllerState) {
        if state.session.refresh_dirty() {
            self.emit(SessionEvent::DirtyChanged {
                session_id: state.session.id.clone(),
                dirty: state.session.dirty,
            });
        }
    }

    fn install(&self, state: &mut ControllerState, session: Session) {
        let from = state.session.mode;
        let was_dirty = state.session.dirty;
        state.session = session;
        let to = state.session.mode;
        self.emit(SessionEvent::ModeChanged {
            session_id: state.session.id.clone(),
            from,
            to,
        });
        if state.session.dirty != was_dirty {
            self.emit(SessionEvent::DirtyChanged {
                session_id: state.session.id.clone(),
                dirty: state.session.dirty,
            });
        }
    }

    /// Change notifications for the UI layer.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Navigate to `session_id`.
    ///
    /// A resolvable snapshot restores the session in `view` mode. Otherwise
    /// an unsaved draft restores it in `edit` mode, and failing that an empty
    /// `edit` session is created under the same id. Never fails.
    pub async fn load(&self, session_id: &str) -> Session {
        let generation = self.state().supersede();

        let session = match self.inner.persistence.read_snapshot(session_id).await {
            Some(resolved) => {
                info!(
                    session_id = %session_id,
                    source = %resolved.source,
                    "Session restored from snapshot"
                );
                Session::from_snapshot(resolved.snapshot)
            }
            None => match self.inner.persistence.read_draft(session_id) {
                Some(draft) => {
                    info!(session_id = %session_id, "Session restored from draft");
                    Session::from_draft(session_id, draft)
                }
                None => {
                    debug!(session_id = %session_id, "No persisted state; starting empty session");
                    Session::new(session_id)
                }
            },
        };

        let mut state = self.state();
        if state.generation != generation {
            debug!(session_id = %session_id, "Load overtaken by a later navigation");
            return state.session.clone();
        }
        self.install(&mut state, session);
        state.session.clone()
    }

    /// Replace the current session with a fresh, empty one. Returns its id.
    pub fn new_session(&self) -> String {
        let mut state = self.state();
        state.supersede();
        self.install(&mut state, Session::fresh());
        info!(session_id = %state.session.id, "New session");
        state.session.id.clone()
    }

    /// Run one analysis of the current query and options.
    ///
    /// At most one run is in flight per controller: a call while analyzing
    /// returns `RunOutcome::Skipped` without contacting the connector.
    pub async fn start_analysis(&self) -> AppResult<RunOutcome> {
        let (ticket, cancel, request) = {
            let mut state = self.state();
            if state.session.mode == SessionMode::Analyzing {
                debug!(session_id = %state.session.id, "Analysis already in flight");
                return Ok(RunOutcome::Skipped);
            }
            let request = AnalysisRequest::new(
                state.session.query.clone(),
                state.session.options.clone(),
            );
            request.validate()?;

            state.generation += 1;
            let ticket = RunTicket::new(state.session.id.clone(), state.generation);
            let cancel = CancellationToken::new();
            state.active_run = Some(ActiveRun {
                ticket: ticket.clone(),
                cancel: cancel.clone(),
            });
            state.session.stages.clear();
            state.session.result = None;
            state.session.progress = ProgressIndicator::new(request.expected_stages());
            self.set_mode(&mut state, SessionMode::Analyzing);
            info!(
                session_id = %ticket.session_id,
                generation = ticket.generation,
                "Analysis started"
            );
            (ticket, cancel, request)
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<TaggedEvent>();
        let sink = PipelineSink::new(ticket.clone(), tx, cancel);

        let result = {
            let run = self.inner.connector.run(&request, &sink);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    biased;
                    Some((event_ticket, event)) = rx.recv() => {
                        self.apply_event(&event_ticket, event);
                    }
                    result = &mut run => break result,
                }
            }
        };
        while let Ok((event_ticket, event)) = rx.try_recv() {
            self.apply_event(&event_ticket, event);
        }

        Ok(self.finish_run(&ticket, result))
    }

    fn apply_event(&self, ticket: &RunTicket, event: PipelineEvent) {
        let mut state = self.state();
        if !state.is_current(ticket) {
            debug!(
                session_id = %ticket.session_id,
                generation = ticket.generation,
                stage = %event.stage(),
                "Dropping event from stale run"
            );
            return;
        }

        let view = RunView {
            stages: std::mem::take(&mut state.session.stages),
            progress: std::mem::take(&mut state.session.progress),
        };
        let view = fold(view, &event);
        state.session.stages = view.stages;
        state.session.progress = view.progress;

        let session_id = state.session.id.clone();
        drop(state);
        match event {
            PipelineEvent::Progress { stage } => {
                self.emit(SessionEvent::Progress { session_id, stage })
            }
            PipelineEvent::StageComplete { stage, .. } => {
                debug!(session_id = %session_id, stage = %stage, "Stage completed");
                self.emit(SessionEvent::StageCompleted { session_id, stage })
            }
        }
    }

    fn finish_run(&self, ticket: &RunTicket, result: AnalysisResult) -> RunOutcome {
        let mut state = self.state();
        if !state.is_current(ticket) {
            info!(
                session_id = %ticket.session_id,
                generation = ticket.generation,
                "Discarding result of superseded run"
            );
            return RunOutcome::Superseded;
        }
        state.active_run = None;

        if let Some(kind) = result.error_kind() {
            warn!(
                session_id = %state.session.id,
                error = %kind,
                message = result.message.as_deref().unwrap_or_default(),
                "Analysis failed"
            );
            state.session.stages.clear();
            state.session.progress = ProgressIndicator::default();
            state.session.result = Some(result);
            state.session.touch();
            self.set_mode(&mut state, SessionMode::Failed);
            self.set_mode(&mut state, SessionMode::Edit);
            self.refresh_dirty(&mut state);
            return RunOutcome::Failed(kind);
        }

        if let Some(envelope) = result.stage_envelope() {
            state.session.stages = merge(&state.session.stages, &envelope);
        }
        state.session.result = Some(result);
        state.session.baseline.query = state.session.query.clone();
        state.session.baseline.options = state.session.options.clone();
        state.session.touch();
        self.set_mode(&mut state, SessionMode::View);
        self.refresh_dirty(&mut state);

        let session_id = state.session.id.clone();
        let snapshot = state.session.to_snapshot(self.inner.user_id.as_deref());
        drop(state);

        info!(session_id = %session_id, "Analysis completed");
        self.inner.drafts.cancel(&session_id);
        if let Err(e) = self.inner.persistence.clear_draft(&session_id) {
            warn!(session_id = %session_id, error = %e, "Failed to clear draft");
        }
        if let Some(snapshot) = snapshot {
            self.persist(snapshot);
        }
        RunOutcome::Completed
    }

    fn persist(&self, snapshot: SessionSnapshot) {
        let session_id = snapshot.id.clone();
        match self.inner.persistence.write_snapshot(&snapshot) {
            Ok(remote_write) => {
                let events = self.inner.events.clone();
                tokio::spawn(async move {
                    if let Err(e) = remote_write.wait().await {
                        let _ = events.send(SessionEvent::PersistenceWarning {
                            session_id,
                            message: format!("Remote copy not saved: {}", e),
                        });
                    }
                });
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Snapshot write failed");
                self.emit(SessionEvent::PersistenceWarning {
                    session_id,
                    message: format!("Snapshot not saved: {}", e),
                });
            }
        }
    }

    fn edit<F>(&self, apply: F) -> AppResult<()>
    where
        F: FnOnce(&mut Session),
    {
        let mut state = self.state();
        if !state.session.mode.allows_edits() {
            return Err(AppError::invalid_state(format!(
                "Cannot edit while {:?}",
                state.session.mode
            )));
        }
        apply(&mut state.session);
        state.session.touch();
        self.refresh_dirty(&mut state);

        if state.session.mode == SessionMode::Edit {
            let session_id = state.session.id.clone();
            let draft = state.session.to_draft();
            drop(state);
            self.inner.drafts.schedule(&session_id, draft);
        }
        Ok(())
    }

    /// Replace the query text. Allowed in `edit` and `view`.
    pub fn edit_query(&self, text: impl Into<String>) -> AppResult<()> {
        let text = text.into();
        self.edit(|session| session.query = text)
    }

    /// Replace the analysis options. Allowed in `edit` and `view`.
    pub fn set_options(&self, options: AnalysisOptions) -> AppResult<()> {
        self.edit(|session| session.options = options)
    }

    /// Explicit `view → edit` transition. A no-op in `edit`.
    pub fn begin_edit(&self) -> AppResult<()> {
        let mut state = self.state();
        match state.session.mode {
            SessionMode::View => {
                self.set_mode(&mut state, SessionMode::Edit);
                Ok(())
            }
            SessionMode::Edit => Ok(()),
            mode => Err(AppError::invalid_state(format!(
                "Cannot begin editing while {:?}",
                mode
            ))),
        }
    }

    /// Discard edits by restoring the baseline.
    ///
    /// Returns to `view` when the session holds a completed result; a
    /// session that never completed stays in `edit`.
    pub fn cancel_edit(&self) -> AppResult<()> {
        let mut state = self.state();
        if !state.session.mode.allows_edits() {
            return Err(AppError::invalid_state(format!(
                "Cannot cancel edits while {:?}",
                state.session.mode
            )));
        }
        state.session.query = state.session.baseline.query.clone();
        state.session.options = state.session.baseline.options.clone();
        state.session.touch();
        self.refresh_dirty(&mut state);

        let completed = state
            .session
            .result
            .as_ref()
            .is_some_and(|result| !result.is_error());
        if completed {
            self.set_mode(&mut state, SessionMode::View);
        }

        let session_id = state.session.id.clone();
        drop(state);
        self.inner.drafts.cancel(&session_id);
        if let Err(e) = self.inner.persistence.clear_draft(&session_id) {
            warn!(session_id = %session_id, error = %e, "Failed to clear draft");
        }
        Ok(())
    }

    /// Copy of the current session
    pub fn session(&self) -> Session {
        self.state().session.clone()
    }

    pub fn session_id(&self) -> String {
        self.state().session.id.clone()
    }

    pub fn mode(&self) -> SessionMode {
        self.state().session.mode
    }

    pub fn is_dirty(&self) -> bool {
        self.state().session.dirty
    }

    /// Current stages of the session
    pub fn stages(&self) -> StageStore {
        self.state().session.stages.clone()
    }

    /// One stage, from the live store or the result's embedded envelope.
    pub fn stage(&self, stage: &StageName) -> Option<StageResult> {
        self.state().session.stage(stage)
    }

    /// Structured error of the last run, if it failed.
    pub fn error(&self) -> Option<AnalysisError> {
        self.state()
            .session
            .result
            .as_ref()
            .and_then(AnalysisResult::as_error)
    }

    /// The result to render; `None` when the last run failed.
    pub fn display_result(&self) -> Option<AnalysisResult> {
        self.state()
            .session
            .result
            .clone()
            .filter(|result| !result.is_error())
    }

    /// Whether a debounced draft write is pending for the current session.
    pub fn draft_pending(&self) -> bool {
        let session_id = self.session_id();
        self.inner.drafts.is_pending(&session_id)
    }
}
