//! Catch-up over the server's REST API.

use super::LogSource;
use crate::action::LoggedAction;
use crate::sync::SyncError;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches `GET {base}/session/{id}/actions`.
pub struct HttpLogSource {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpLogSource {
    /// `base_url` is the API root, e.g. `http://localhost:3030`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, SyncError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn actions_url(&self, session_id: &str) -> Result<url::Url, SyncError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["session", session_id, "actions"]);
        Ok(url)
    }
}

impl LogSource for HttpLogSource {
    fn fetch_all(&mut self, session_id: &str) -> Result<Vec<LoggedAction>, SyncError> {
        let url = self.actions_url(session_id)?;
        log::debug!("Fetching session log from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let mut actions: Vec<LoggedAction> =
            response.json().map_err(|e| SyncError::Fetch(e.to_string()))?;

        actions.sort_by_key(|entry| entry.sequence);
        Ok(actions)
    }
}
