//! HTTP Remote Store
//!
//! `RemoteStore` backed by the analyses document API:
//!
//! - `GET    {base}/health` - reachability probe
//! - `PUT    {base}/api/analyses/{id}` - store a snapshot
//! - `GET    {base}/api/analyses/{id}` - fetch a snapshot (404 = absent)
//! - `DELETE {base}/api/analyses/{id}` - remove a snapshot
//! - `GET    {base}/api/analyses?project_id=&user_id=&limit=` - newest first

use std::time::Duration;

use async_trait::async_trait;
use sqlopt_core::SessionSnapshot;
use tracing::debug;

use super::remote::{RecentFilter, RemoteStore};
use crate::utils::error::{AppError, AppResult};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Remote snapshot store reached over HTTP.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl HttpRemoteStore {
    /// Create a store for `base_url` with the given probe timeout.
    pub fn new(base_url: impl Into<String>, probe_timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_reqwest_client(client, base_url, probe_timeout))
    }

    /// Wrap an existing reqwest client.
    pub fn with_reqwest_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            probe_timeout,
        }
    }

    /// `{base}/api/analyses/{id}` with the id encoded as one path segment.
    fn analysis_url(&self, session_id: &str) -> AppResult<url::Url> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| AppError::config(format!("Invalid remote store URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::config("Remote store URL cannot take a path"))?
            .pop_if_empty()
            .extend(["api", "analyses", session_id]);
        Ok(url)
    }

    async fn status_error(response: reqwest::Response) -> AppError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        AppError::RemoteStatus { status, body }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %e, "Remote store probe failed");
                false
            }
        }
    }

    async fn get(&self, session_id: &str) -> AppResult<Option<SessionSnapshot>> {
        let response = self.client.get(self.analysis_url(session_id)?).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        let body = response.text().await?;
        Ok(Some(SessionSnapshot::from_json(&body)?))
    }

    async fn set(&self, snapshot: &SessionSnapshot) -> AppResult<()> {
        let response = self
            .client
            .put(self.analysis_url(&snapshot.id)?)
            .json(snapshot)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> AppResult<bool> {
        let response = self
            .client
            .delete(self.analysis_url(session_id)?)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(true)
    }

    async fn list_recent(&self, filter: &RecentFilter) -> AppResult<Vec<SessionSnapshot>> {
        let mut query: Vec<(&str, String)> =
            vec![("limit", filter.effective_limit().to_string())];
        if let Some(project_id) = &filter.project_id {
            query.push(("project_id", project_id.clone()));
        }
        if let Some(user_id) = &filter.user_id {
            query.push(("user_id", user_id.clone()));
        }

        let response = self
            .client
            .get(format!("{}/api/analyses", self.base_url))
            .query(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        let snapshots: Vec<SessionSnapshot> = response.json().await?;
        Ok(snapshots
            .into_iter()
            .filter(|snapshot| snapshot.validate().is_ok())
            .collect())
    }
}
