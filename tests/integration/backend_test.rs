//! Backend Integration Tests
//!
//! The HTTP connector and its simulation fallback behind a real controller:
//! - Streamed stages land in the session as they arrive
//! - An unhealthy service falls back to the simulation
//! - Without the simulation the run ends as `backend_unavailable`

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sqlopt_core::{AnalysisOptions, ErrorKind, StageName};
use sqlopt_session::models::session::{SessionEvent, SessionMode};
use sqlopt_session::models::settings::ClientConfig;
use sqlopt_session::services::backend::{
    HttpBackend, HttpBackendConfig, LocalSimulation, PipelineConnector,
};
use sqlopt_session::services::persistence::PersistenceCoordinator;
use sqlopt_session::services::session::{RunOutcome, SessionController};
use sqlopt_session::storage::local::InMemoryLocalStore;
use sqlopt_session::storage::remote::InMemoryRemoteStore;

// ============================================================================
// Helpers
// ============================================================================

fn service(base_url: String) -> Arc<HttpBackend> {
    Arc::new(
        HttpBackend::new(HttpBackendConfig {
            base_url,
            probe_timeout: Duration::from_millis(500),
            run_timeout: Duration::from_secs(5),
            retries: 0,
            retry_backoff: Duration::from_millis(10),
        })
        .unwrap(),
    )
}

fn controller(connector: PipelineConnector) -> SessionController {
    SessionController::new(
        Arc::new(connector),
        PersistenceCoordinator::new(
            Arc::new(InMemoryLocalStore::new()),
            Arc::new(InMemoryRemoteStore::new()),
        ),
        &ClientConfig::default(),
    )
}

async fn healthy_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Service runs
// ============================================================================

#[tokio::test]
async fn test_streamed_run_populates_session() {
    let server = healthy_server().await;
    let body = concat!(
        "data: {\"type\":\"progress\",\"stage\":\"metadata\"}\n\n",
        "data: {\"type\":\"stage_complete\",\"stage\":\"metadata\",\"data\":{\"tables\":[\"orders\"]}}\n\n",
        "data: {\"type\":\"stage_complete\",\"stage\":\"rules\",\"data\":[{\"type\":\"SELECT_STAR\"}]}\n\n",
        "data: {\"type\":\"stage_complete\",\"stage\":\"optimization\",\"data\":{\"optimizedQuery\":\"SELECT id FROM orders\"},\"executionTime\":1.5}\n\n",
        "data: {\"type\":\"stage_complete\",\"stage\":\"report\",\"data\":{\"summary\":\"1 issue\"}}\n\n",
        "data: {\"type\":\"result\",\"optimizedQuery\":\"SELECT id FROM orders\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/optimize-query"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let controller = controller(PipelineConnector::new(service(server.uri()), None));
    controller.edit_query("SELECT * FROM orders").unwrap();
    let mut events = controller.subscribe();

    assert_eq!(controller.start_analysis().await.unwrap(), RunOutcome::Completed);
    assert_eq!(controller.mode(), SessionMode::View);

    let stages = controller.stages();
    assert_eq!(stages.len(), 4);
    assert_eq!(
        stages.get(&StageName::Optimization).unwrap().execution_time,
        Some(1.5)
    );
    assert!(!controller.display_result().unwrap().is_simulated());

    let mut completed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StageCompleted { stage, .. } = event {
            completed.push(stage);
        }
    }
    assert_eq!(completed, StageName::CORE.to_vec());
}

#[tokio::test]
async fn test_json_result_envelope_fills_stages() {
    let server = healthy_server().await;
    Mock::given(method("POST"))
        .and(path("/api/optimize-query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "optimizedQuery": "SELECT id FROM t LIMIT 1000",
            "metadata": {
                "stages": {
                    "metadata": {"tables": ["t"]},
                    "rules": [],
                    "optimization": {"optimizedQuery": "SELECT id FROM t LIMIT 1000"},
                    "report": {"summary": "ok"},
                    "validation_output": {"resultsMatch": true}
                }
            }
        })))
        .mount(&server)
        .await;

    let controller = controller(PipelineConnector::new(service(server.uri()), None));
    controller.edit_query("SELECT * FROM t").unwrap();
    controller
        .set_options(AnalysisOptions {
            validate: true,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(controller.start_analysis().await.unwrap(), RunOutcome::Completed);
    assert_eq!(controller.stages().len(), 5);
    assert_eq!(
        controller.stage(&StageName::ValidationOutput).unwrap().data,
        json!({"resultsMatch": true})
    );
}

// ============================================================================
// Fallback
// ============================================================================

#[tokio::test]
async fn test_unhealthy_service_falls_back_to_simulation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/optimize-query"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let connector = PipelineConnector::new(
        service(server.uri()),
        Some(LocalSimulation::new(Duration::from_millis(1))),
    );
    let controller = controller(connector);
    controller.edit_query("SELECT * FROM a CROSS JOIN b").unwrap();

    assert_eq!(controller.start_analysis().await.unwrap(), RunOutcome::Completed);
    let result = controller.display_result().unwrap();
    assert!(result.is_simulated());
    assert!(result
        .issues
        .iter()
        .any(|issue| issue.issue_type == "CROSS_JOIN"));
    assert_eq!(controller.stages().len(), 4);
}

#[tokio::test]
async fn test_unreachable_service_without_simulation_is_unavailable() {
    let connector = PipelineConnector::new(service("http://127.0.0.1:1".to_string()), None);
    let controller = controller(connector);
    controller.edit_query("SELECT 1").unwrap();

    let outcome = controller.start_analysis().await.unwrap();
    assert_eq!(outcome, RunOutcome::Failed(ErrorKind::BackendUnavailable));
    assert_eq!(controller.mode(), SessionMode::Edit);

    let error = controller.error().unwrap();
    assert_eq!(error.kind, ErrorKind::BackendUnavailable);
    assert!(!error.suggestions.is_empty());
}

#[tokio::test]
async fn test_http_error_status_is_service_failure() {
    let server = healthy_server().await;
    Mock::given(method("POST"))
        .and(path("/api/optimize-query"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let controller = controller(PipelineConnector::new(service(server.uri()), None));
    controller.edit_query("SELECT 1").unwrap();

    let outcome = controller.start_analysis().await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Failed(ErrorKind::Service("service_unavailable".to_string()))
    );
    assert!(controller.stages().is_empty());
}
