//! Stage Store
//!
//! Per-stage results of one analysis run and the merge rule that reconciles
//! them. A stage name maps to at most one result; a later write for the same
//! stage replaces the earlier one wholesale.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of one step of the remote optimization pipeline.
///
/// The known stages sort in pipeline order. Names the client does not know
/// are kept verbatim as `Custom` and sort after the known ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageName {
    Metadata,
    Rules,
    Optimization,
    Report,
    ValidationOutput,
    Custom(String),
}

impl StageName {
    /// Stages every run produces, in pipeline order.
    pub const CORE: [StageName; 4] = [
        StageName::Metadata,
        StageName::Rules,
        StageName::Optimization,
        StageName::Report,
    ];

    /// Ordered stage list for a run; validation only when requested.
    pub fn pipeline(validate: bool) -> Vec<StageName> {
        let mut stages = Self::CORE.to_vec();
        if validate {
            stages.push(StageName::ValidationOutput);
        }
        stages
    }

    /// Parse a stage name, accepting the agent names used by the remote
    /// pipeline as aliases.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "metadata" | "metadata_extractor" | "metadata_output" => StageName::Metadata,
            "rules" | "rule_checker" | "rules_output" => StageName::Rules,
            "optimization" | "query_optimizer" | "optimization_output" => StageName::Optimization,
            "report" | "final_reporter" | "report_output" => StageName::Report,
            "validation_output" | "validation" | "query_validation_agent" => {
                StageName::ValidationOutput
            }
            other => StageName::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StageName::Metadata => "metadata",
            StageName::Rules => "rules",
            StageName::Optimization => "optimization",
            StageName::Report => "report",
            StageName::ValidationOutput => "validation_output",
            StageName::Custom(name) => name,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for StageName {
    fn from(raw: String) -> Self {
        StageName::parse(&raw)
    }
}

impl From<&str> for StageName {
    fn from(raw: &str) -> Self {
        StageName::parse(raw)
    }
}

impl From<StageName> for String {
    fn from(name: StageName) -> String {
        name.as_str().to_string()
    }
}

/// Output of one completed stage. The payload is opaque to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

impl StageResult {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            execution_time: None,
        }
    }

    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = Some(seconds);
        self
    }
}

/// Map from stage name to the current result for that stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageStore {
    entries: BTreeMap<StageName, StageResult>,
}

impl StageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage result, replacing any earlier one for the same stage.
    pub fn insert(&mut self, stage: StageName, result: StageResult) {
        self.entries.insert(stage, result);
    }

    pub fn get(&self, stage: &StageName) -> Option<&StageResult> {
        self.entries.get(stage)
    }

    pub fn contains(&self, stage: &StageName) -> bool {
        self.entries.contains_key(stage)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stage names present, in pipeline order.
    pub fn stage_names(&self) -> Vec<StageName> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StageName, &StageResult)> {
        self.entries.iter()
    }

    /// Merge `incoming` into this store in place. See [`merge`].
    pub fn merge_from(&mut self, incoming: &StageStore) {
        for (stage, result) in &incoming.entries {
            self.entries.insert(stage.clone(), result.clone());
        }
    }

    /// Build a store from the raw `stages` envelope of a result's metadata.
    ///
    /// Envelope values are either bare payloads or `{data, executionTime}`
    /// objects; both forms are accepted.
    pub fn from_envelope(envelope: &BTreeMap<String, Value>) -> Self {
        let mut store = StageStore::new();
        for (name, value) in envelope {
            store.insert(StageName::parse(name), stage_result_from_value(value));
        }
        store
    }

    /// Raw `stages` envelope for embedding into result metadata.
    ///
    /// Payloads are written bare unless they carry an execution time or
    /// would read back as a wrapper; `from_envelope` inverts this exactly.
    pub fn to_envelope(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|(name, result)| (name.to_string(), stage_result_to_value(result)))
            .collect()
    }
}

impl FromIterator<(StageName, StageResult)> for StageStore {
    fn from_iter<T: IntoIterator<Item = (StageName, StageResult)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Right-biased merge: every stage in `incoming` overwrites the same stage
/// in `existing`; stages absent from `incoming` are kept. Idempotent.
pub fn merge(existing: &StageStore, incoming: &StageStore) -> StageStore {
    let mut merged = existing.clone();
    merged.merge_from(incoming);
    merged
}

fn stage_result_to_value(result: &StageResult) -> Value {
    let looks_wrapped =
        stage_result_from_value(&result.data) != StageResult::new(result.data.clone());
    if result.execution_time.is_none() && !looks_wrapped {
        return result.data.clone();
    }
    let mut map = serde_json::Map::new();
    map.insert("data".to_string(), result.data.clone());
    if let Some(seconds) = result.execution_time {
        map.insert("executionTime".to_string(), Value::from(seconds));
    }
    Value::Object(map)
}

fn stage_result_from_value(value: &Value) -> StageResult {
    if let Value::Object(map) = value {
        if let Some(data) = map.get("data") {
            let only_wrapper_keys = map
                .keys()
                .all(|key| key == "data" || key == "executionTime" || key == "execution_time");
            if only_wrapper_keys {
                let execution_time = map
                    .get("executionTime")
                    .or_else(|| map.get("execution_time"))
                    .and_then(Value::as_f64);
                return StageResult {
                    data: data.clone(),
                    execution_time,
                };
            }
        }
    }
    StageResult::new(value.clone())
}
