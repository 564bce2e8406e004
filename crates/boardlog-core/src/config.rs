//! Client configuration.

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::session::DEFAULT_OUTBOX_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one whiteboard client. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhiteboardConfig {
    /// Undoable local actions kept per participant.
    pub history_limit: usize,
    /// Minimum gap between preview frames, in milliseconds.
    pub throttle_interval_ms: u64,
    /// Committed actions held while the transport is down.
    pub outbox_limit: usize,
    /// WebSocket endpoint of the relay.
    pub server_url: String,
    /// REST root used for catch-up.
    pub api_url: String,
}

impl Default for WhiteboardConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            throttle_interval_ms: 16,
            outbox_limit: DEFAULT_OUTBOX_LIMIT,
            server_url: "ws://localhost:3030/ws".to_string(),
            api_url: "http://localhost:3030".to_string(),
        }
    }
}

impl WhiteboardConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_json(&json)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid("historyLimit must be at least 1".into()));
        }
        if self.outbox_limit == 0 {
            return Err(ConfigError::Invalid("outboxLimit must be at least 1".into()));
        }
        if !self.server_url.starts_with("ws://") {
            return Err(ConfigError::Invalid(format!(
                "serverUrl must be a ws:// URL, got {}",
                self.server_url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = WhiteboardConfig::default();
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.throttle_interval(), Duration::from_millis(16));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WhiteboardConfig::from_json(r#"{"historyLimit": 10}"#).unwrap();
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.outbox_limit, DEFAULT_OUTBOX_LIMIT);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            WhiteboardConfig::from_json(r#"{"historyLimit": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            WhiteboardConfig::from_json(r#"{"serverUrl": "http://x"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            WhiteboardConfig::from_json(r#"{"serverUrl": "wss://board.example/ws"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            WhiteboardConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"apiUrl": "http://board.local"}}"#).unwrap();
        let config = WhiteboardConfig::load(file.path()).unwrap();
        assert_eq!(config.api_url, "http://board.local");
    }
}
