//! Server configuration.
//!
//! Defaults can be overridden with environment variables:
//! - `BOARDLOG_ADDR`: bind address (default `0.0.0.0:3030`)
//! - `BOARDLOG_DATA_DIR`: directory for durable session logs (default: in-memory)
//! - `BOARDLOG_CHANNEL_CAPACITY`: per-session broadcast buffer (default 256)

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid BOARDLOG_ADDR '{0}'")]
    InvalidAddr(String),
    #[error("Invalid BOARDLOG_CHANNEL_CAPACITY '{0}'")]
    InvalidCapacity(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Session logs are kept in memory when unset.
    pub data_dir: Option<PathBuf>,
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            data_dir: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(addr) = lookup("BOARDLOG_ADDR") {
            config.addr = addr.parse().map_err(|_| ConfigError::InvalidAddr(addr))?;
        }
        if let Some(dir) = lookup("BOARDLOG_DATA_DIR").filter(|d| !d.is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(capacity) = lookup("BOARDLOG_CHANNEL_CAPACITY") {
            config.channel_capacity = match capacity.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidCapacity(capacity)),
            };
        }
        Ok(config)
    }
}
