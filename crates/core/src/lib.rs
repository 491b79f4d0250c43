//! SQL Optimizer Core
//!
//! Data model and pure algorithms for the SQL optimizer session client. This
//! crate does no I/O and owns no clocks: the root crate supplies storage,
//! transport and timers.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `stages` - Stage names, stage results and the right-biased `StageStore`
//! - `analysis` - Request options, issues, the terminal `AnalysisResult` and error kinds
//! - `events` - Pipeline events, run tickets and the `fold` reducer
//! - `snapshot` - Persisted snapshot and draft shapes

pub mod analysis;
pub mod error;
pub mod events;
pub mod snapshot;
pub mod stages;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Stages ─────────────────────────────────────────────────────────────
pub use stages::{merge, StageName, StageResult, StageStore};

// ── Analysis Model ─────────────────────────────────────────────────────
pub use analysis::{
    AnalysisError, AnalysisOptions, AnalysisRequest, AnalysisResult, ErrorKind, Issue,
    ResultMetadata, Severity,
};

// ── Pipeline Events ────────────────────────────────────────────────────
pub use events::{fold, PipelineEvent, ProgressIndicator, RunTicket, RunView};

// ── Persisted Shapes ───────────────────────────────────────────────────
pub use snapshot::{draft_key, snapshot_key, DraftSnapshot, SessionSnapshot};
