//! Run Stream Parsing
//!
//! The optimizer service streams a run as Server-Sent Events:
//!
//! ```text
//! data: {"type":"progress","stage":"metadata_extractor"}
//!
//! data: {"type":"stage_complete","stage":"metadata","data":{...},"executionTime":0.4}
//!
//! data: {"type":"result","optimizedQuery":"...","issues":[...]}
//!
//! data: [DONE]
//! ```
//!
//! A failed run ends with `{"type":"error","error":"<tag>","message":"..."}`.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use sqlopt_core::{AnalysisResult, CoreError, ErrorKind, StageName, StageResult};

use crate::utils::error::AppError;

/// One event of a streamed run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunStreamEvent {
    Progress {
        stage: StageName,
    },
    StageComplete {
        stage: StageName,
        #[serde(default)]
        data: Value,
        #[serde(default, rename = "executionTime", alias = "execution_time")]
        execution_time: Option<f64>,
    },
    Result(AnalysisResult),
    Error {
        error: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        suggestions: Vec<String>,
        #[serde(default)]
        details: Option<Value>,
    },
}

impl RunStreamEvent {
    /// Stage payload carried by a `StageComplete` event
    pub fn stage_result(data: Value, execution_time: Option<f64>) -> StageResult {
        let result = StageResult::new(data);
        match execution_time {
            Some(seconds) => result.with_execution_time(seconds),
            None => result,
        }
    }

    /// Error-shaped result for an `Error` event
    pub fn error_result(
        error: String,
        message: Option<String>,
        suggestions: Vec<String>,
        details: Option<Value>,
    ) -> AnalysisResult {
        let kind = ErrorKind::from_tag(&error);
        let message = message.unwrap_or_else(|| format!("Analysis failed: {}", kind));
        let mut result = AnalysisResult::failure(kind, message);
        if !suggestions.is_empty() {
            result.suggestions = suggestions;
        }
        result.details = details;
        result
    }
}

/// Parse a byte stream into run events.
///
/// Buffers raw bytes, splits on newlines and parses `data:` lines as JSON
/// `RunStreamEvent`s. Only complete lines are decoded, so a character split
/// across chunks survives intact.
pub fn parse_run_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<RunStreamEvent, AppError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    let state = SseParserState {
        inner: Box::pin(byte_stream.map(|chunk| chunk.map_err(Into::into))),
        buffer: Vec::new(),
        pending_events: VecDeque::new(),
    };

    futures_util::stream::unfold(state, |mut state| async move {
        if let Some(event) = state.pending_events.pop_front() {
            return Some((event, state));
        }

        loop {
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);

                    while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                        if let Some(event) = parse_sse_bytes(&line[..pos]) {
                            state.pending_events.push_back(event);
                        }
                    }

                    if let Some(event) = state.pending_events.pop_front() {
                        return Some((event, state));
                    }
                }
                Some(Err(e)) => return Some((Err(e), state)),
                None => {
                    if !state.buffer.is_empty() {
                        let remaining = std::mem::take(&mut state.buffer);
                        if let Some(event) = parse_sse_bytes(&remaining) {
                            return Some((event, state));
                        }
                    }
                    return None;
                }
            }
        }
    })
}

struct SseParserState {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, AppError>> + Send>>,
    buffer: Vec<u8>,
    pending_events: VecDeque<Result<RunStreamEvent, AppError>>,
}

fn parse_sse_bytes(line: &[u8]) -> Option<Result<RunStreamEvent, AppError>> {
    match std::str::from_utf8(line) {
        Ok(line) => parse_sse_line(line),
        Err(e) => Some(Err(AppError::Core(CoreError::parse(format!(
            "Run event line is not valid UTF-8: {}",
            e
        ))))),
    }
}

/// Parse one SSE line.
///
/// Returns `None` for blank lines, comments, `[DONE]` and non-data fields.
pub fn parse_sse_line(line: &str) -> Option<Result<RunStreamEvent, AppError>> {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let data = trimmed.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<RunStreamEvent>(data) {
        Ok(event) => Some(Ok(event)),
        Err(e) => Some(Err(AppError::Core(CoreError::parse(format!(
            "Failed to parse run event: {} (data: {})",
            e, data
        ))))),
    }
}
