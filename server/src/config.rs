//! Server configuration, loaded from an optional JSON file and overridden by
//! command line flags

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_sessions: usize,
    /// Negotiated in the handshake only; traffic is never encrypted
    pub encryption_enabled: bool,
    pub handshake_timeout_ms: u64,
    /// 0 waits for dependency acknowledgments until the channel closes
    pub dependency_timeout_ms: u64,
    pub max_frame_size: usize,
    pub lobby_space_id: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5190,
            max_sessions: 256,
            encryption_enabled: false,
            handshake_timeout_ms: 10_000,
            dependency_timeout_ms: 0,
            max_frame_size: 1024 * 1024,
            lobby_space_id: 1,
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn dependency_timeout(&self) -> Option<Duration> {
        (self.dependency_timeout_ms > 0).then(|| Duration::from_millis(self.dependency_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"port": 6000, "encryption_enabled": true}"#;
        let config = ServerConfig::from_json(json).unwrap();
        assert_eq!(config.port, 6000);
        assert!(config.encryption_enabled);
        assert_eq!(config.max_sessions, ServerConfig::default().max_sessions);
        assert_eq!(config.bind_address(), "127.0.0.1:6000");
    }

    #[test]
    fn test_dependency_timeout() {
        let mut config = ServerConfig::default();
        assert_eq!(config.dependency_timeout(), None);
        config.dependency_timeout_ms = 250;
        assert_eq!(config.dependency_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ServerConfig::from_json("{\"port\": \"high\"}"),
            Err(ConfigError::Json(_))
        ));
    }
}
