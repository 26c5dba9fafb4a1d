//! Centralized Configuration Management
//!
//! Every tunable of the client lives here so the binary can load one TOML
//! document and hand the pieces to the session and the history manager.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ParleyError, Result};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Timeouts and limits for one server connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time allowed for the TCP connect
    pub connect_timeout_ms: u64,
    /// Time a single call waits for its response
    pub request_timeout_ms: u64,
    /// Largest frame body accepted or sent
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,              // 5 seconds
            request_timeout_ms: 10_000,             // 10 seconds
            max_frame_size: DEFAULT_MAX_FRAME_SIZE, // 16 MiB fits a few minutes of audio
        }
    }
}

impl SessionConfig {
    /// Short timeouts for tests against a local server
    pub fn testing() -> Self {
        Self {
            connect_timeout_ms: 1_000,
            request_timeout_ms: 2_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Generous timeouts for slow or distant servers
    pub fn patient() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            request_timeout_ms: 60_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ParleyError::config_error("timeouts must be non-zero"));
        }
        if self.max_frame_size < 64 {
            return Err(ParleyError::config_error(format!(
                "max_frame_size {} is too small to carry any frame",
                self.max_frame_size
            )));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// History Configuration
// ----------------------------------------------------------------------------

/// Where local history lives and how long it is kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Root directory for per-user stores; `None` keeps history in memory only
    pub data_dir: Option<PathBuf>,
    /// Entries older than this many days are purged at login
    pub retention_days: Option<u32>,
}

impl HistoryConfig {
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            retention_days: None,
        }
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }
}

// ----------------------------------------------------------------------------
// Server Configuration
// ----------------------------------------------------------------------------

/// Address of the chat server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub history: HistoryConfig,
    /// Default log level when no verbosity flag is given
    pub log_level: String,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            history: HistoryConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ParleyConfig {
    /// Configuration for tests: in-memory history and short timeouts
    pub fn testing() -> Self {
        Self {
            session: SessionConfig::testing(),
            log_level: "debug".to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if self.server.host.is_empty() {
            return Err(ParleyError::config_error("server host is empty"));
        }
        if self.history.retention_days == Some(0) {
            return Err(ParleyError::config_error(
                "retention_days must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ParleyConfig::default().validate().is_ok());
        assert!(ParleyConfig::testing().validate().is_ok());
        assert_eq!(SessionConfig::default().request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let document = r#"{"server":{"port":7777},"history":{"retention_days":30}}"#;
        let config: ParleyConfig = serde_json::from_str(document).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7777);
        assert_eq!(config.history.retention_days, Some(30));
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ParleyConfig::default();
        config.session.request_timeout_ms = 0;
        assert!(config.validate().is_err());

        let config = ParleyConfig {
            history: HistoryConfig::default().with_retention_days(0),
            ..ParleyConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
