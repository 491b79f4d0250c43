//! Analysis Model
//!
//! Request options, the terminal `AnalysisResult` returned by the optimizer
//! service (or the local simulation), and the error taxonomy carried inside
//! it. Failures are values here: a result with `error` set is advisory only.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::stages::{StageName, StageResult, StageStore};

/// User-selected options for one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    /// Ask the service for a rewritten query
    #[serde(default = "default_rewrite")]
    pub rewrite: bool,
    /// Ask the service to run the original and optimized queries and compare
    #[serde(default)]
    pub validate: bool,
    /// Project the query belongs to
    #[serde(
        default,
        alias = "projectName",
        alias = "project_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub project_id: Option<String>,
}

fn default_rewrite() -> bool {
    true
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            rewrite: default_rewrite(),
            validate: false,
            project_id: None,
        }
    }
}

/// One analysis request as sent to the optimizer service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub query: String,
    pub options: AnalysisOptions,
}

impl AnalysisRequest {
    pub fn new(query: impl Into<String>, options: AnalysisOptions) -> Self {
        Self {
            query: query.into(),
            options,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.query.trim().is_empty() {
            return Err(CoreError::validation("query is empty"));
        }
        Ok(())
    }

    /// Stages this request is expected to produce, in order.
    pub fn expected_stages(&self) -> Vec<StageName> {
        StageName::pipeline(self.options.validate)
    }
}

/// Issue severity. Known levels plus whatever the service sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Other(String),
}

impl From<String> for Severity {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Other(raw),
        }
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> String {
        match severity {
            Severity::Critical => "critical".to_string(),
            Severity::High => "high".to_string(),
            Severity::Medium => "medium".to_string(),
            Severity::Low => "low".to_string(),
            Severity::Other(raw) => raw,
        }
    }
}

/// An anti-pattern found in the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    /// Service-specific fields, kept so results round-trip losslessly
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Issue {
    pub fn new(
        issue_type: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            issue_type: issue_type.into(),
            severity,
            description: description.into(),
            impact: None,
            extra: Map::new(),
        }
    }

    pub fn with_impact(mut self, impact: impl Into<String>) -> Self {
        self.impact = Some(impact.into());
        self
    }
}

/// Metadata envelope of a result. May embed a copy of the stage outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kind of failure that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Probe failed and no request was attempted
    BackendUnavailable,
    /// Probe succeeded but the run failed at transport level
    ConnectionError,
    /// The service answered and reported a failure with this tag
    Service(String),
}

impl ErrorKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "backend_unavailable" => ErrorKind::BackendUnavailable,
            "connection_error" => ErrorKind::ConnectionError,
            other => ErrorKind::Service(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::Service(tag) => tag,
        }
    }

    /// Remediation hints shown when the failure carries none of its own.
    pub fn default_suggestions(&self) -> Vec<String> {
        let hints: &[&str] = match self {
            ErrorKind::BackendUnavailable => &[
                "Check that the optimizer service is running",
                "Verify the backend URL in the client configuration",
            ],
            ErrorKind::ConnectionError => &[
                "Check your network connection",
                "Retry the analysis; the service may have restarted",
            ],
            ErrorKind::Service(_) => &[
                "Retry the analysis in a few minutes",
                "Simplify the query if the problem persists",
            ],
        };
        hints.iter().map(|hint| hint.to_string()).collect()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Terminal response of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AnalysisResult {
    /// Error-shaped result for the given failure kind.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            suggestions: kind.default_suggestions(),
            error: Some(kind.tag().to_string()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_deref().map(ErrorKind::from_tag)
    }

    /// Structured error view, filling in default suggestions when the
    /// payload has none.
    pub fn as_error(&self) -> Option<AnalysisError> {
        let kind = self.error_kind()?;
        let suggestions = if self.suggestions.is_empty() {
            kind.default_suggestions()
        } else {
            self.suggestions.clone()
        };
        Some(AnalysisError {
            message: self
                .message
                .clone()
                .unwrap_or_else(|| format!("Analysis failed: {}", kind)),
            kind,
            suggestions,
            details: self.details.clone(),
        })
    }

    /// Stage outputs embedded in the metadata envelope, if any.
    pub fn stage_envelope(&self) -> Option<StageStore> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.stages.as_ref())
            .map(StageStore::from_envelope)
    }

    /// One stage from the embedded envelope.
    pub fn stage(&self, stage: &StageName) -> Option<StageResult> {
        self.stage_envelope()
            .and_then(|store| store.get(stage).cloned())
    }

    pub fn is_simulated(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.extra.get("simulated"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// What the UI renders instead of a result when a run failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisError {
    #[serde(serialize_with = "serialize_kind")]
    pub kind: ErrorKind,
    pub message: String,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

fn serialize_kind<S: serde::Serializer>(kind: &ErrorKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.tag())
}
