//! Logging Setup
//!
//! Installs a `tracing-subscriber` fmt subscriber for hosts embedding the
//! session client. Honours `RUST_LOG`; otherwise logs at `info`, or `debug`
//! when requested.

use tracing_subscriber::EnvFilter;

use crate::utils::error::{AppError, AppResult};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(debug: bool) -> AppResult<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sqlopt_session={default_level},sqlopt_core={default_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| AppError::internal(format!("Failed to install tracing subscriber: {}", e)))
}
