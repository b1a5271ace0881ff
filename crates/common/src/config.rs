//! Client configuration
//!
//! Built once by the caller and injected into the HTTP client and the engine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Control plane client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Controller base URL
    pub endpoint: String,

    /// Bearer token for the controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Accept self-signed controller certificates
    pub allow_unverified_ssl: bool,

    /// Per-call-class timeouts
    pub timeouts: TimeoutConfig,

    /// Async task polling
    pub polling: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://127.0.0.1:8443".to_string(),
            token: None,
            allow_unverified_ssl: false,
            timeouts: TimeoutConfig::default(),
            polling: PollConfig::default(),
        }
    }
}

/// Timeouts for short (get, toggle) and long (create, delete) calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub short_secs: u64,
    pub long_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            short_secs: 30,
            long_secs: 600,
        }
    }
}

impl TimeoutConfig {
    pub fn short(&self) -> Duration {
        Duration::from_secs(self.short_secs)
    }

    pub fn long(&self) -> Duration {
        Duration::from_secs(self.long_secs)
    }
}

/// Interval between task polls and the overall deadline for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub deadline_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            deadline_secs: 1200,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl ClientConfig {
    /// Load configuration from file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
            Ok(config)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.timeouts.short_secs == 0 || self.timeouts.long_secs == 0 {
            return Err(Error::InvalidConfig("timeouts must be non-zero".to_string()));
        }
        if self.polling.interval_secs == 0 || self.polling.deadline_secs == 0 {
            return Err(Error::InvalidConfig(
                "polling interval and deadline must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
