//! Error Handling
//!
//! Unified error types for the session client.
//! Uses thiserror for ergonomic error definitions.
//!
//! Analysis failures are not errors here: they travel as error-shaped
//! `AnalysisResult` values. `AppError` covers storage, transport plumbing,
//! configuration and caller misuse.

use sqlopt_core::CoreError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Connection pool and schema failures of the local tier
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite errors (auto-converted from rusqlite::Error)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// HTTP transport errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote store answered with an unexpected status
    #[error("Remote store error (HTTP {status}): {body}")]
    RemoteStatus { status: u16, body: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors from the core data layer
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not allowed in the current session mode
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Lost tasks, poisoned locks
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
