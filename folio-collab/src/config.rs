//! Server configuration.
//!
//! Defaults, overlaid by an optional TOML file, overlaid by `FOLIO_*`
//! environment variables:
//!
//! ```toml
//! ws_addr = "127.0.0.1:3001"
//! http_addr = "127.0.0.1:3000"
//! storage_path = "/var/lib/folio"   # omit for an in-memory store
//! outbox_capacity = 256
//! heartbeat_interval_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket (push transport) bind address
    pub ws_addr: String,
    /// HTTP (request/response transport) bind address
    pub http_addr: String,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Queued outbound frames per session before relays are dropped
    pub outbox_capacity: usize,
    /// Heartbeat interval in seconds (0 disables)
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_addr: "127.0.0.1:3001".to_string(),
            http_addr: "127.0.0.1:3000".to_string(),
            storage_path: None,
            outbox_capacity: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Load from an optional file, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read and parse a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FOLIO_*` overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("FOLIO_WS_ADDR") {
            self.ws_addr = addr;
        }
        if let Some(addr) = lookup("FOLIO_HTTP_ADDR") {
            self.http_addr = addr;
        }
        if let Some(path) = lookup("FOLIO_STORAGE_PATH") {
            self.storage_path = if path.is_empty() { None } else { Some(PathBuf::from(path)) };
        }
        if let Some(value) = lookup("FOLIO_OUTBOX_CAPACITY") {
            self.outbox_capacity = parse_env("FOLIO_OUTBOX_CAPACITY", value)?;
        }
        if let Some(value) = lookup("FOLIO_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = parse_env("FOLIO_HEARTBEAT_INTERVAL_SECS", value)?;
        }
        Ok(())
    }

    /// `None` when heartbeats are disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.ws_addr, "127.0.0.1:3001");
        assert_eq!(config.http_addr, "127.0.0.1:3000");
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(30)));
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str("ws_addr = \"0.0.0.0:9001\"").unwrap();
        assert_eq!(config.ws_addr, "0.0.0.0:9001");
        assert_eq!(config.http_addr, "127.0.0.1:3000");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(
            &path,
            "storage_path = \"/tmp/folio\"\nheartbeat_interval_secs = 0\n",
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.storage_path, Some(PathBuf::from("/tmp/folio")));
        assert_eq!(config.heartbeat_interval(), None);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            ServerConfig::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "outbox_capacity = \"lots\"").unwrap();
        assert!(matches!(
            ServerConfig::from_file(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env_from(env(&[
                ("FOLIO_HTTP_ADDR", "0.0.0.0:8080"),
                ("FOLIO_STORAGE_PATH", "/data/folio"),
                ("FOLIO_OUTBOX_CAPACITY", "32"),
            ]))
            .unwrap();

        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.storage_path, Some(PathBuf::from("/data/folio")));
        assert_eq!(config.outbox_capacity, 32);
        assert_eq!(config.ws_addr, "127.0.0.1:3001");
    }

    #[test]
    fn test_empty_storage_env_clears_path() {
        let mut config = ServerConfig {
            storage_path: Some(PathBuf::from("/data")),
            ..ServerConfig::default()
        };
        config.apply_env_from(env(&[("FOLIO_STORAGE_PATH", "")])).unwrap();
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env_from(env(&[("FOLIO_HEARTBEAT_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { key: "FOLIO_HEARTBEAT_INTERVAL_SECS", .. }
        ));
    }
}
