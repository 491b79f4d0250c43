//! Cross-Platform Path Utilities
//!
//! Resolves the client's data directory (~/.sqlopt/) and the files in it.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the client data directory (~/.sqlopt/)
pub fn sqlopt_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".sqlopt"))
}

/// Get the config file path (~/.sqlopt/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(sqlopt_dir()?.join("config.json"))
}

/// Get the durable-local session database path (~/.sqlopt/sessions.db)
pub fn sessions_db_path() -> AppResult<PathBuf> {
    Ok(sqlopt_dir()?.join("sessions.db"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Ensure the parent directory of a file path exists
pub fn ensure_parent_dir(path: &Path) -> AppResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}
