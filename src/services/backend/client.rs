//! Optimizer Service Client
//!
//! HTTP connector for the optimizer service. Supports the health probe and
//! analysis runs answered either as an SSE stream of pipeline events or as a
//! single JSON result.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use sqlopt_core::{AnalysisRequest, AnalysisResult, ErrorKind};
use tracing::{debug, info, warn};

use super::connector::{BackendConnector, PipelineSink};
use super::sse::{parse_run_stream, RunStreamEvent};
use crate::models::settings::ClientConfig;
use crate::utils::error::{AppError, AppResult};

/// Configuration for the optimizer service client.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    /// Health probe timeout
    pub probe_timeout: Duration,
    /// Upper bound for one run, retries included
    pub run_timeout: Duration,
    /// Extra attempts after a failed connection
    pub retries: u32,
    /// Delay before the first retry; doubled for each further one
    pub retry_backoff: Duration,
}

impl From<&ClientConfig> for HttpBackendConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            base_url: config.backend_url.clone(),
            probe_timeout: config.probe_timeout(),
            run_timeout: config.run_timeout(),
            retries: config.transport_retries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// HTTP client for the optimizer service.
pub struct HttpBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_reqwest_client(client, config))
    }

    /// Wrap an existing reqwest client.
    pub fn with_reqwest_client(client: reqwest::Client, mut config: HttpBackendConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Send the request, retrying only when no response was received.
    async fn send_with_retry(
        &self,
        request: &AnalysisRequest,
        sink: &PipelineSink,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut attempt: u32 = 0;
        loop {
            let sent = self
                .client
                .post(self.endpoint("/api/optimize-query"))
                .header(reqwest::header::ACCEPT, "text/event-stream, application/json")
                .json(request)
                .send()
                .await;

            match sent {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.retries && !sink.is_cancelled() => {
                    let delay = self.config.retry_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(
                        session_id = %sink.ticket().session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Optimizer request failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_once(&self, request: &AnalysisRequest, sink: &PipelineSink) -> AnalysisResult {
        let response = match self.send_with_retry(request, sink).await {
            Ok(response) => response,
            Err(e) => {
                return AnalysisResult::failure(
                    ErrorKind::ConnectionError,
                    format!("Could not reach the optimizer service: {}", e),
                )
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return service_error(status.as_u16(), &body);
        }

        let is_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));

        if is_stream {
            consume_stream(response, sink).await
        } else {
            consume_json(response, sink).await
        }
    }
}

/// Error-shaped result for a non-success HTTP answer.
fn service_error(status: u16, body: &str) -> AnalysisResult {
    let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);

    let tag = text("error").unwrap_or_else(|| match status {
        503 => "service_unavailable".to_string(),
        _ => "service_error".to_string(),
    });
    let message = text("message")
        .or_else(|| text("detail"))
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| format!("Optimizer service answered HTTP {}", status));
    let suggestions: Vec<String> = payload
        .get("suggestions")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default();

    RunStreamEvent::error_result(tag, Some(message), suggestions, payload.get("details").cloned())
}

async fn consume_stream(response: reqwest::Response, sink: &PipelineSink) -> AnalysisResult {
    let mut events = Box::pin(parse_run_stream(response.bytes_stream()));

    while let Some(event) = events.next().await {
        match event {
            Ok(RunStreamEvent::Progress { stage }) => sink.progress(stage),
            Ok(RunStreamEvent::StageComplete {
                stage,
                data,
                execution_time,
            }) => {
                debug!(session_id = %sink.ticket().session_id, stage = %stage, "Stage complete");
                sink.stage_complete(stage, RunStreamEvent::stage_result(data, execution_time));
            }
            Ok(RunStreamEvent::Result(result)) => return result,
            Ok(RunStreamEvent::Error {
                error,
                message,
                suggestions,
                details,
            }) => return RunStreamEvent::error_result(error, message, suggestions, details),
            Err(e) => {
                return AnalysisResult::failure(
                    ErrorKind::ConnectionError,
                    format!("Malformed response from the optimizer service: {}", e),
                )
            }
        }
    }

    AnalysisResult::failure(
        ErrorKind::ConnectionError,
        "The optimizer service closed the stream without a result",
    )
}

/// A plain JSON answer is the terminal result; its embedded stage envelope
/// is replayed as stage completions in pipeline order.
async fn consume_json(response: reqwest::Response, sink: &PipelineSink) -> AnalysisResult {
    let result: AnalysisResult = match response.json().await {
        Ok(result) => result,
        Err(e) => {
            return AnalysisResult::failure(
                ErrorKind::ConnectionError,
                format!("Malformed response from the optimizer service: {}", e),
            )
        }
    };

    if result.is_error() {
        return result;
    }

    if let Some(envelope) = result.stage_envelope() {
        for (stage, stage_result) in envelope.iter() {
            sink.progress(stage.clone());
            sink.stage_complete(stage.clone(), stage_result.clone());
        }
    }
    result
}

#[async_trait]
impl BackendConnector for HttpBackend {
    async fn probe(&self) -> bool {
        let url = self.endpoint("/health");
        match self
            .client
            .get(&url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %e, "Optimizer probe failed");
                false
            }
        }
    }

    async fn run(&self, request: &AnalysisRequest, sink: &PipelineSink) -> AnalysisResult {
        info!(
            session_id = %sink.ticket().session_id,
            expected_stages = request.expected_stages().len(),
            "Starting optimizer run"
        );

        tokio::select! {
            _ = sink.cancelled() => AnalysisResult::failure(
                ErrorKind::ConnectionError,
                "Analysis was abandoned",
            ),
            outcome = tokio::time::timeout(self.config.run_timeout, self.run_once(request, sink)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => AnalysisResult::failure(
                        ErrorKind::ConnectionError,
                        format!(
                            "The optimizer service did not answer within {}s",
                            self.config.run_timeout.as_secs()
                        ),
                    ),
                }
            }
        }
    }
}
