//! 错误类型 - 采样到投递的错误分类

use thiserror::Error;

/// Everything that can go wrong between sampling and delivery
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Process-manager query failed; recovered as `Unknown`
    #[error("Sampling failed: {0}")]
    Sampling(String),

    /// Initial connection to the collector gave up
    #[error("Connection to collector failed after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },

    /// Transport-level failure (connect, read, write)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Collector rejected the shared secret
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    /// Last-known-value file could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MonitorError {
    /// Process exit code when this error ends the agent
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::ConnectionExhausted { .. } => 1,
            MonitorError::Config(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
