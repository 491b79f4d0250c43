//! Session Controller Integration Tests
//!
//! Drives the controller through full lifecycles:
//! - At most one run in flight per session
//! - Events and results of abandoned runs never reach the new session
//! - Simulation fallback when the optimizer service is unreachable
//! - Service-reported failures end in `edit` without a snapshot
//! - Debounced drafts and their restoration on load
//! - Non-fatal remote write failures

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sqlopt_core::{
    draft_key, snapshot_key, AnalysisOptions, AnalysisRequest, AnalysisResult, ErrorKind,
    StageName, StageResult,
};
use sqlopt_session::models::session::{SessionEvent, SessionMode};
use sqlopt_session::models::settings::ClientConfig;
use sqlopt_session::services::backend::{
    BackendConnector, HttpBackend, HttpBackendConfig, PipelineConnector, PipelineSink,
};
use sqlopt_session::services::persistence::PersistenceCoordinator;
use sqlopt_session::services::session::{RunOutcome, SessionController};
use sqlopt_session::storage::local::{InMemoryLocalStore, LocalStore};
use sqlopt_session::storage::remote::InMemoryRemoteStore;

// ============================================================================
// Helpers
// ============================================================================

/// Connector that blocks each run until released.
#[derive(Default)]
struct GatedConnector {
    started: Notify,
    release: Notify,
    runs: AtomicUsize,
}

#[async_trait]
impl BackendConnector for GatedConnector {
    async fn probe(&self) -> bool {
        true
    }

    async fn run(&self, request: &AnalysisRequest, sink: &PipelineSink) -> AnalysisResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        for stage in request.expected_stages() {
            sink.stage_complete(stage, StageResult::new(json!({"late": true})));
        }
        AnalysisResult {
            optimized_query: Some("SELECT 1".to_string()),
            ..Default::default()
        }
    }
}

/// Connector that yields to the scheduler between stages.
#[derive(Default)]
struct YieldingConnector {
    runs: AtomicUsize,
}

#[async_trait]
impl BackendConnector for YieldingConnector {
    async fn probe(&self) -> bool {
        true
    }

    async fn run(&self, request: &AnalysisRequest, sink: &PipelineSink) -> AnalysisResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for stage in request.expected_stages() {
            sink.progress(stage.clone());
            tokio::task::yield_now().await;
            sink.stage_complete(stage.clone(), StageResult::new(json!({"stage": stage.as_str()})));
        }
        AnalysisResult::default()
    }
}

struct Harness {
    controller: SessionController,
    local: Arc<InMemoryLocalStore>,
    remote: Arc<InMemoryRemoteStore>,
}

fn harness(connector: Arc<dyn BackendConnector>) -> Harness {
    let local = Arc::new(InMemoryLocalStore::new());
    let remote = Arc::new(InMemoryRemoteStore::new());
    let persistence = PersistenceCoordinator::new(local.clone(), remote.clone());
    let controller = SessionController::new(connector, persistence, &ClientConfig::default());
    Harness {
        controller,
        local,
        remote,
    }
}

fn mode_changes(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionMode> {
    let mut modes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::ModeChanged { to, .. } = event {
            modes.push(to);
        }
    }
    modes
}

// ============================================================================
// At most one run
// ============================================================================

#[tokio::test]
async fn test_second_start_while_analyzing_is_skipped() {
    let connector = Arc::new(GatedConnector::default());
    let h = harness(connector.clone());
    h.controller.edit_query("SELECT * FROM t").unwrap();

    let first = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start_analysis().await })
    };
    connector.started.notified().await;

    assert_eq!(h.controller.start_analysis().await.unwrap(), RunOutcome::Skipped);
    assert_eq!(h.controller.mode(), SessionMode::Analyzing);

    connector.release.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), RunOutcome::Completed);
    assert_eq!(connector.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_immediate_double_start_runs_once() {
    let connector = Arc::new(YieldingConnector::default());
    let h = harness(connector.clone());
    h.controller.edit_query("SELECT * FROM t").unwrap();

    let (a, b) = tokio::join!(h.controller.start_analysis(), h.controller.start_analysis());

    assert_eq!(a.unwrap(), RunOutcome::Completed);
    assert_eq!(b.unwrap(), RunOutcome::Skipped);
    assert_eq!(connector.runs.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.stages().len(), 4);
}

#[tokio::test]
async fn test_edits_are_rejected_while_analyzing() {
    let connector = Arc::new(GatedConnector::default());
    let h = harness(connector.clone());
    h.controller.edit_query("SELECT 1").unwrap();

    let run = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start_analysis().await })
    };
    connector.started.notified().await;

    assert!(h.controller.edit_query("SELECT 2").is_err());
    assert!(h.controller.set_options(AnalysisOptions::default()).is_err());
    assert!(h.controller.cancel_edit().is_err());

    connector.release.notify_one();
    run.await.unwrap().unwrap();
    assert_eq!(h.controller.session().query, "SELECT 1");
}

// ============================================================================
// Stale-callback isolation
// ============================================================================

#[tokio::test]
async fn test_abandoned_run_cannot_touch_new_session() {
    let connector = Arc::new(GatedConnector::default());
    let h = harness(connector.clone());
    h.controller.edit_query("SELECT * FROM t").unwrap();
    let old_id = h.controller.session_id();

    let run = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start_analysis().await })
    };
    connector.started.notified().await;

    let new_id = h.controller.new_session();
    connector.release.notify_one();

    assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Superseded);

    let session = h.controller.session();
    assert_eq!(session.id, new_id);
    assert_ne!(session.id, old_id);
    assert!(session.stages.is_empty());
    assert!(session.result.is_none());
    assert_eq!(session.mode, SessionMode::Edit);
    assert!(h.local.get(&snapshot_key(&old_id)).unwrap().is_none());
}

#[tokio::test]
async fn test_reloading_during_run_drops_its_result() {
    let connector = Arc::new(GatedConnector::default());
    let h = harness(connector.clone());
    h.controller.edit_query("SELECT 1").unwrap();
    let id = h.controller.session_id();

    let run = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start_analysis().await })
    };
    connector.started.notified().await;

    let reloaded = h.controller.load(&id).await;
    connector.release.notify_one();

    assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Superseded);
    assert_eq!(reloaded.mode, SessionMode::Edit);
    assert!(h.controller.stages().is_empty());
}

// ============================================================================
// Scenarios against the HTTP stack
// ============================================================================

#[tokio::test]
async fn test_unreachable_backend_runs_simulation() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        backend_url: "http://127.0.0.1:1".to_string(),
        remote_store_url: "http://127.0.0.1:1".to_string(),
        probe_timeout_ms: 200,
        simulation_step_ms: 5,
        local_db_path: Some(dir.path().join("sessions.db")),
        ..Default::default()
    };
    let controller = SessionController::from_config(&config).unwrap();
    controller.edit_query("SELECT * FROM t").unwrap();
    controller
        .set_options(AnalysisOptions {
            validate: false,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(controller.start_analysis().await.unwrap(), RunOutcome::Completed);
    assert_eq!(controller.mode(), SessionMode::View);
    assert!(controller.error().is_none());

    let result = controller.display_result().unwrap();
    assert!(result.is_simulated());

    let stages = controller.stages();
    for stage in StageName::CORE.iter() {
        assert!(stages.contains(stage), "missing stage {}", stage);
    }
    assert!(!stages.contains(&StageName::ValidationOutput));

    // Merging the result envelope must not erase per-stage timings.
    for (stage, result) in stages.iter() {
        assert_eq!(result.execution_time, Some(0.005), "stage {}", stage);
    }
}

#[tokio::test]
async fn test_service_error_ends_in_edit_without_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/optimize-query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "service_unavailable",
            "message": "The optimization model is temporarily unavailable"
        })))
        .mount(&server)
        .await;

    let service = HttpBackend::new(HttpBackendConfig {
        base_url: server.uri(),
        probe_timeout: Duration::from_millis(500),
        run_timeout: Duration::from_secs(5),
        retries: 1,
        retry_backoff: Duration::from_millis(10),
    })
    .unwrap();
    let connector = Arc::new(PipelineConnector::new(Arc::new(service), None));
    let h = harness(connector);
    h.controller.edit_query("SELECT * FROM t").unwrap();
    let mut events = h.controller.subscribe();

    let outcome = h.controller.start_analysis().await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Failed(ErrorKind::Service("service_unavailable".to_string()))
    );
    assert_eq!(
        mode_changes(&mut events),
        vec![SessionMode::Analyzing, SessionMode::Failed, SessionMode::Edit]
    );
    assert_eq!(h.controller.mode(), SessionMode::Edit);
    assert!(h.controller.stages().is_empty());
    assert!(h.controller.display_result().is_none());

    let error = h.controller.error().unwrap();
    assert_eq!(
        error.message,
        "The optimization model is temporarily unavailable"
    );
    assert!(!error.suggestions.is_empty());

    let id = h.controller.session_id();
    assert!(h.local.get(&snapshot_key(&id)).unwrap().is_none());
    assert_eq!(h.remote.write_count(), 0);
}

// ============================================================================
// Drafts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_drafts_are_debounced_and_restored() {
    let h = harness(Arc::new(YieldingConnector::default()));
    let id = h.controller.session_id();

    for query in ["S", "SE", "SELECT 1"] {
        h.controller.edit_query(query).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(h.local.get(&draft_key(&id)).unwrap().is_none());
    assert!(h.controller.draft_pending());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let raw = h.local.get(&draft_key(&id)).unwrap().unwrap();
    assert!(raw.contains("SELECT 1"));
    assert!(h.local.get(&snapshot_key(&id)).unwrap().is_none());

    h.controller.new_session();
    let restored = h.controller.load(&id).await;
    assert_eq!(restored.mode, SessionMode::Edit);
    assert_eq!(restored.query, "SELECT 1");
    assert!(restored.dirty);
}

#[tokio::test(start_paused = true)]
async fn test_completion_discards_pending_draft() {
    let h = harness(Arc::new(YieldingConnector::default()));
    let id = h.controller.session_id();

    h.controller.edit_query("SELECT * FROM t").unwrap();
    assert_eq!(h.controller.start_analysis().await.unwrap(), RunOutcome::Completed);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.local.get(&draft_key(&id)).unwrap().is_none());
    assert!(h.local.get(&snapshot_key(&id)).unwrap().is_some());
}

#[tokio::test]
async fn test_snapshot_wins_over_draft_on_load() {
    let h = harness(Arc::new(YieldingConnector::default()));
    h.controller.edit_query("SELECT * FROM t").unwrap();
    h.controller.start_analysis().await.unwrap();
    let id = h.controller.session_id();

    h.local
        .set(
            &draft_key(&id),
            r#"{"query":"SELECT unsaved","options":{},"timestamp":1}"#,
        )
        .unwrap();

    h.controller.new_session();
    let restored = h.controller.load(&id).await;
    assert_eq!(restored.mode, SessionMode::View);
    assert_eq!(restored.query, "SELECT * FROM t");
}

// ============================================================================
// Remote tier failures
// ============================================================================

#[tokio::test]
async fn test_remote_write_failure_is_only_a_warning() {
    let h = harness(Arc::new(YieldingConnector::default()));
    h.remote.set_reject_writes(true);
    h.controller.edit_query("SELECT * FROM t").unwrap();
    let mut events = h.controller.subscribe();

    assert_eq!(h.controller.start_analysis().await.unwrap(), RunOutcome::Completed);
    assert_eq!(h.controller.mode(), SessionMode::View);

    let warning = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::PersistenceWarning { message, .. }) => return Some(message),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .unwrap();
    assert!(warning.unwrap().contains("Remote copy not saved"));

    let id = h.controller.session_id();
    assert!(h.local.get(&snapshot_key(&id)).unwrap().is_some());
    assert_eq!(h.controller.mode(), SessionMode::View);
}
