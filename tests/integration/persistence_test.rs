//! Persistence Integration Tests
//!
//! Tier resolution against a file-backed SQLite local tier:
//! - Snapshots survive a restart and restore the `view` session field for field
//! - Local hits never reach the remote tier
//! - Remote hits are backfilled locally
//! - Recent listings honor their filters

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use sqlopt_core::{
    AnalysisOptions, AnalysisRequest, AnalysisResult, SessionSnapshot, StageName, StageResult,
    StageStore,
};
use sqlopt_session::models::session::SessionMode;
use sqlopt_session::models::settings::ClientConfig;
use sqlopt_session::services::backend::{BackendConnector, PipelineSink};
use sqlopt_session::services::persistence::{PersistenceCoordinator, SnapshotSource};
use sqlopt_session::services::session::{RunOutcome, SessionController};
use sqlopt_session::storage::local_sqlite::SqliteLocalStore;
use sqlopt_session::storage::remote::{InMemoryRemoteStore, RecentFilter, RemoteStore};
use sqlopt_session::AppError;

// ============================================================================
// Helpers
// ============================================================================

struct EchoConnector;

#[async_trait]
impl BackendConnector for EchoConnector {
    async fn probe(&self) -> bool {
        true
    }

    async fn run(&self, request: &AnalysisRequest, sink: &PipelineSink) -> AnalysisResult {
        for stage in request.expected_stages() {
            sink.progress(stage.clone());
            sink.stage_complete(
                stage.clone(),
                StageResult::new(json!({"stage": stage.as_str(), "query": request.query}))
                    .with_execution_time(0.25),
            );
        }
        AnalysisResult {
            optimized_query: Some(format!("{} LIMIT 1000", request.query)),
            ..Default::default()
        }
    }
}

fn snapshot(id: &str, timestamp: i64, project: Option<&str>) -> SessionSnapshot {
    let mut stage_data = StageStore::new();
    stage_data.insert(StageName::Metadata, StageResult::new(json!({"tables": ["t"]})));
    SessionSnapshot {
        id: id.to_string(),
        query: format!("SELECT * FROM {}", id),
        options: AnalysisOptions {
            project_id: project.map(str::to_string),
            ..Default::default()
        },
        result: AnalysisResult {
            optimized_query: Some("SELECT id FROM t".to_string()),
            ..Default::default()
        },
        stage_data,
        timestamp,
        project_id: project.map(str::to_string),
        user_id: Some("demo".to_string()),
    }
}

fn sqlite(dir: &tempfile::TempDir) -> Arc<SqliteLocalStore> {
    Arc::new(SqliteLocalStore::open(&dir.path().join("sessions.db")).unwrap())
}

// ============================================================================
// Restart survival
// ============================================================================

#[tokio::test]
async fn test_completed_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.set_offline(true);

    let first = SessionController::new(
        Arc::new(EchoConnector),
        PersistenceCoordinator::new(sqlite(&dir), remote.clone()),
        &ClientConfig::default(),
    );
    first.edit_query("SELECT * FROM orders").unwrap();
    first
        .set_options(AnalysisOptions {
            validate: true,
            project_id: Some("finance".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(first.start_analysis().await.unwrap(), RunOutcome::Completed);
    let original = first.session();

    // Fresh store and cache, same database file.
    let second = SessionController::new(
        Arc::new(EchoConnector),
        PersistenceCoordinator::new(sqlite(&dir), remote.clone()),
        &ClientConfig::default(),
    );
    let restored = second.load(&original.id).await;

    assert_eq!(restored.id, original.id);
    assert_eq!(restored.mode, SessionMode::View);
    assert_eq!(restored.query, original.query);
    assert_eq!(restored.options, original.options);
    assert_eq!(restored.result, original.result);
    assert_eq!(restored.stages, original.stages);
    assert!(!restored.dirty);
    assert_eq!(restored.stages.len(), 5);
    assert_eq!(
        second.stage(&StageName::ValidationOutput).unwrap().execution_time,
        Some(0.25)
    );
}

#[tokio::test]
async fn test_draft_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());

    let first = PersistenceCoordinator::new(sqlite(&dir), remote.clone());
    first
        .write_draft(
            "s-draft",
            &sqlopt_core::DraftSnapshot {
                query: "SELECT 42".to_string(),
                options: AnalysisOptions::default(),
                timestamp: 7,
            },
        )
        .unwrap();

    let second = SessionController::new(
        Arc::new(EchoConnector),
        PersistenceCoordinator::new(sqlite(&dir), remote),
        &ClientConfig::default(),
    );
    let restored = second.load("s-draft").await;
    assert_eq!(restored.mode, SessionMode::Edit);
    assert_eq!(restored.query, "SELECT 42");
    assert!(restored.result.is_none());
}

// ============================================================================
// Tier precedence
// ============================================================================

#[tokio::test]
async fn test_local_hit_does_not_consult_remote() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());

    let writer = PersistenceCoordinator::new(sqlite(&dir), remote.clone());
    writer.write_snapshot(&snapshot("s-1", 1, None)).unwrap().wait().await.unwrap();
    let reads_before = remote.read_count();

    let reader = PersistenceCoordinator::new(sqlite(&dir), remote.clone());
    let resolved = reader.read_snapshot("s-1").await.unwrap();
    assert_eq!(resolved.source, SnapshotSource::Local);
    assert_eq!(remote.read_count(), reads_before);

    let again = reader.read_snapshot("s-1").await.unwrap();
    assert_eq!(again.source, SnapshotSource::Ephemeral);
}

#[tokio::test]
async fn test_remote_hit_is_backfilled_into_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.set(&snapshot("s-remote", 5, None)).await.unwrap();

    let coordinator = PersistenceCoordinator::new(sqlite(&dir), remote.clone());
    let resolved = coordinator.read_snapshot("s-remote").await.unwrap();
    assert_eq!(resolved.source, SnapshotSource::Remote);

    // Offline remote and a fresh cache: only the backfilled row can answer.
    remote.set_offline(true);
    let restarted = PersistenceCoordinator::new(sqlite(&dir), remote.clone());
    let resolved = restarted.read_snapshot("s-remote").await.unwrap();
    assert_eq!(resolved.source, SnapshotSource::Local);
    assert_eq!(resolved.snapshot, snapshot("s-remote", 5, None));
}

#[tokio::test]
async fn test_offline_remote_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.set(&snapshot("s-away", 5, None)).await.unwrap();
    remote.set_offline(true);

    let coordinator = PersistenceCoordinator::new(sqlite(&dir), remote);
    assert!(coordinator.read_snapshot("s-away").await.is_none());
}

// ============================================================================
// Recent listings
// ============================================================================

#[tokio::test]
async fn test_recent_snapshots_filter_and_order() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());
    let coordinator = PersistenceCoordinator::new(sqlite(&dir), remote.clone());

    for (id, timestamp, project) in [
        ("a", 10, Some("finance")),
        ("b", 30, Some("finance")),
        ("c", 20, Some("marketing")),
        ("d", 40, None),
    ] {
        coordinator
            .write_snapshot(&snapshot(id, timestamp, project))
            .unwrap()
            .wait()
            .await
            .unwrap();
    }

    let all = coordinator
        .recent_snapshots(&RecentFilter::default())
        .await
        .unwrap();
    let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["d", "b", "c", "a"]);

    let finance = coordinator
        .recent_snapshots(&RecentFilter {
            project_id: Some("finance".to_string()),
            limit: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(finance.len(), 1);
    assert_eq!(finance[0].id, "b");

    remote.set_offline(true);
    assert!(matches!(
        coordinator.recent_snapshots(&RecentFilter::default()).await,
        Err(AppError::RemoteStatus { status: 503, .. })
    ));
}
