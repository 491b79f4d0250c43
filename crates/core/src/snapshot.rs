//! Persisted Shapes
//!
//! `SessionSnapshot` is the full, self-sufficient record of a completed
//! analysis; `DraftSnapshot` is the partial record of in-progress edits.
//! They are stored under distinct keys so a draft never satisfies a
//! snapshot read.

use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisOptions, AnalysisResult};
use crate::error::{CoreError, CoreResult};
use crate::stages::{StageName, StageResult, StageStore};

const KEY_PREFIX: &str = "sqlopt";

/// Local-tier key of a session's full snapshot.
pub fn snapshot_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}:analysis:{session_id}")
}

/// Local-tier key of a session's draft.
pub fn draft_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}:draft:{session_id}")
}

/// Everything needed to render a session in `view` mode without network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub options: AnalysisOptions,
    pub result: AnalysisResult,
    #[serde(default, alias = "stageMap", alias = "stage_data")]
    pub stage_data: StageStore,
    /// Epoch milliseconds of the write
    pub timestamp: i64,
    #[serde(default, alias = "project_id", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> CoreResult<Self> {
        let snapshot: SessionSnapshot = serde_json::from_str(raw)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// A snapshot is only worth restoring if it can drive `view` mode.
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::validation("snapshot id is empty"));
        }
        if self.result.is_error() {
            return Err(CoreError::validation(format!(
                "snapshot {} holds a failed run",
                self.id
            )));
        }
        Ok(())
    }

    /// Stage output from the stage map, falling back to the copy embedded in
    /// the result's metadata.
    pub fn stage(&self, stage: &StageName) -> Option<StageResult> {
        self.stage_data
            .get(stage)
            .cloned()
            .or_else(|| self.result.stage(stage))
    }
}

/// Unsaved edits of a session, written while the user types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub query: String,
    #[serde(default)]
    pub options: AnalysisOptions,
    /// Epoch milliseconds of the write
    pub timestamp: i64,
}

impl DraftSnapshot {
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
