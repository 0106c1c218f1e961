//! Agent 配置
//!
//! 从 `~/.config/validator-monitor/config.json`（或 `--config`）加载，
//! 再由 CLI 参数和 `VMON_AUTH_TOKEN` 覆盖

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::delivery::RetryPolicy;
use crate::error::{MonitorError, Result};

/// Environment variable holding the collector shared secret
pub const AUTH_TOKEN_ENV: &str = "VMON_AUTH_TOKEN";

/// What the sampler compares between ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// systemd `ActiveState`
    #[default]
    Status,
    /// `ActiveEnterTimestamp`, any change means restarted
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub increment_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            increment_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.increment_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// systemd unit to watch
    pub service_name: String,
    pub collector_url: String,
    /// Shared secret for the collector
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_token: String,
    pub sampling_mode: SamplingMode,
    pub poll_interval_ms: u64,
    /// Extra sleep after a failed sample
    pub unknown_backoff_ms: u64,
    pub command_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Upper bound on one event write to the collector
    pub write_timeout_ms: u64,
    /// Last-known-value file; none disables persistence
    pub state_file: Option<PathBuf>,
    pub identity_command: Vec<String>,
    pub retry: RetryConfig,
    /// Reconnect in the background after a post-startup disconnect
    pub reconnect: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            service_name: "solana".to_string(),
            collector_url: "tcp://127.0.0.1:7070".to_string(),
            auth_token: String::new(),
            sampling_mode: SamplingMode::Status,
            poll_interval_ms: 500,
            unknown_backoff_ms: 5000,
            command_timeout_ms: 3000,
            handshake_timeout_ms: 5000,
            write_timeout_ms: 5000,
            state_file: None,
            identity_command: vec!["solana".to_string(), "address".to_string()],
            retry: RetryConfig::default(),
            reconnect: false,
        }
    }
}

impl AgentConfig {
    /// `~/.config/validator-monitor/config.json`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("validator-monitor")
            .join("config.json")
    }

    /// Load `path`, or the default path if it exists, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)
                } else {
                    debug!(path = %default.display(), "No config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Take the secret from the environment when set
    pub fn apply_env(&mut self) {
        self.apply_token(std::env::var(AUTH_TOKEN_ENV).ok());
    }

    fn apply_token(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.auth_token = token;
        }
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(MonitorError::Config("service_name is empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(MonitorError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.command_timeout_ms == 0 {
            return Err(MonitorError::Config("command_timeout_ms must be > 0".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(MonitorError::Config("write_timeout_ms must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(MonitorError::Config("retry.max_attempts must be > 0".into()));
        }
        if self.auth_token.is_empty() {
            return Err(MonitorError::Config(format!(
                "auth_token is required (config or {})",
                AUTH_TOKEN_ENV
            )));
        }
        crate::delivery::tcp::socket_addr_from_url(&self.collector_url)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn unknown_backoff(&self) -> Duration {
        Duration::from_millis(self.unknown_backoff_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
