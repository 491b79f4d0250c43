//! Settings Models
//!
//! Client configuration stored in config.json.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client configuration stored in config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the optimizer service
    pub backend_url: String,
    /// Base URL of the remote analysis document store
    pub remote_store_url: String,
    /// Reachability probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Upper bound for one analysis run in seconds
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Retries after a failed connection attempt (never after the service answered)
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Quiet period before a draft is written
    #[serde(default = "default_draft_debounce_ms")]
    pub draft_debounce_ms: u64,
    /// Run the local simulation when the service is unreachable
    #[serde(default = "default_simulation_enabled")]
    pub simulation_enabled: bool,
    /// Delay between simulated stages in milliseconds
    #[serde(default = "default_simulation_step_ms")]
    pub simulation_step_ms: u64,
    /// Durable-local database file; defaults to ~/.sqlopt/sessions.db
    #[serde(default)]
    pub local_db_path: Option<PathBuf>,
    /// Owner recorded on remote snapshots
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_run_timeout_secs() -> u64 {
    300
}

fn default_transport_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_draft_debounce_ms() -> u64 {
    500
}

fn default_simulation_enabled() -> bool {
    true
}

fn default_simulation_step_ms() -> u64 {
    800
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            remote_store_url: "http://localhost:8001".to_string(),
            probe_timeout_ms: default_probe_timeout_ms(),
            run_timeout_secs: default_run_timeout_secs(),
            transport_retries: default_transport_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            draft_debounce_ms: default_draft_debounce_ms(),
            simulation_enabled: default_simulation_enabled(),
            simulation_step_ms: default_simulation_step_ms(),
            local_db_path: None,
            user_id: None,
        }
    }
}

/// Configuration update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigUpdate {
    pub backend_url: Option<String>,
    pub remote_store_url: Option<String>,
    pub probe_timeout_ms: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub transport_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub draft_debounce_ms: Option<u64>,
    pub simulation_enabled: Option<bool>,
    pub simulation_step_ms: Option<u64>,
    pub local_db_path: Option<PathBuf>,
    pub user_id: Option<String>,
}

impl ClientConfig {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(url) = update.backend_url {
            self.backend_url = url;
        }
        if let Some(url) = update.remote_store_url {
            self.remote_store_url = url;
        }
        if let Some(ms) = update.probe_timeout_ms {
            self.probe_timeout_ms = ms;
        }
        if let Some(secs) = update.run_timeout_secs {
            self.run_timeout_secs = secs;
        }
        if let Some(retries) = update.transport_retries {
            self.transport_retries = retries;
        }
        if let Some(ms) = update.retry_backoff_ms {
            self.retry_backoff_ms = ms;
        }
        if let Some(ms) = update.draft_debounce_ms {
            self.draft_debounce_ms = ms;
        }
        if let Some(enabled) = update.simulation_enabled {
            self.simulation_enabled = enabled;
        }
        if let Some(ms) = update.simulation_step_ms {
            self.simulation_step_ms = ms;
        }
        if let Some(path) = update.local_db_path {
            self.local_db_path = Some(path);
        }
        if let Some(user_id) = update.user_id {
            self.user_id = Some(user_id);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("backend_url", &self.backend_url),
            ("remote_store_url", &self.remote_store_url),
        ] {
            let parsed = url::Url::parse(value)
                .map_err(|e| format!("Invalid {}: {} ({})", name, value, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(format!("{} must use http or https: {}", name, value));
            }
        }

        if self.probe_timeout_ms == 0 {
            return Err("probe_timeout_ms must be greater than 0".to_string());
        }

        if self.run_timeout_secs == 0 {
            return Err("run_timeout_secs must be greater than 0".to_string());
        }

        if self.transport_retries > 3 {
            return Err("transport_retries cannot exceed 3".to_string());
        }

        if !(50..=10_000).contains(&self.draft_debounce_ms) {
            return Err("draft_debounce_ms must be between 50 and 10000".to_string());
        }

        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn draft_debounce(&self) -> Duration {
        Duration::from_millis(self.draft_debounce_ms)
    }

    pub fn simulation_step(&self) -> Duration {
        Duration::from_millis(self.simulation_step_ms)
    }
}
