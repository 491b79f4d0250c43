//! JSON Configuration Management
//!
//! Handles reading and writing the client configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::{ClientConfig, ConfigUpdate};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_parent_dir};

/// Configuration service for managing client settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: ClientConfig,
}

impl ConfigService {
    /// Create a config service at the default location (~/.sqlopt/config.json)
    pub fn new() -> AppResult<Self> {
        Self::with_path(config_path()?)
    }

    /// Create a config service backed by the given file, loading existing
    /// config or writing defaults
    pub fn with_path(path: impl Into<PathBuf>) -> AppResult<Self> {
        let config_path = path.into();
        ensure_parent_dir(&config_path)?;

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let default_config = ClientConfig::default();
            Self::save_to_file(&config_path, &default_config)?;
            default_config
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<ClientConfig> {
        let content = fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&content)?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    fn save_to_file(path: &Path, config: &ClientConfig) -> AppResult<()> {
        config.validate().map_err(AppError::validation)?;
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &ClientConfig {
        &self.config
    }

    /// Update the configuration with a partial update.
    ///
    /// The update is validated before anything is written; an invalid update
    /// leaves both memory and disk untouched.
    pub fn update_config(&mut self, update: ConfigUpdate) -> AppResult<ClientConfig> {
        let mut next = self.config.clone();
        next.apply_update(update);
        Self::save_to_file(&self.config_path, &next)?;
        self.config = next;
        Ok(self.config.clone())
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> AppResult<()> {
        self.config = Self::load_from_file(&self.config_path)?;
        Ok(())
    }

    /// Reset configuration to defaults
    pub fn reset(&mut self) -> AppResult<()> {
        self.config = ClientConfig::default();
        Self::save_to_file(&self.config_path, &self.config)
    }
}
