//! systemctl 封装 - 通过 `systemctl show` 查询服务状态

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::command::run_bounded;
use crate::error::{MonitorError, Result};
use crate::status::ServiceStatus;

/// Process-manager collaborator the sampler reads from
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Current `ActiveState` of `service`
    async fn active_state(&self, service: &str) -> Result<ServiceStatus>;

    /// Opaque `ActiveEnterTimestamp` of `service`
    async fn active_enter_timestamp(&self, service: &str) -> Result<String>;
}

/// `Name=value` line of `systemctl show` output
const PROPERTY_LINE: &str = r"(?m)^(\w+)=(.*)$";

/// `systemctl` backed process manager
#[derive(Debug, Clone)]
pub struct SystemctlClient {
    binary: PathBuf,
    timeout: Duration,
    property_line: Regex,
}

impl SystemctlClient {
    /// Resolve `systemctl` on PATH up front so a host without systemd fails at startup
    pub fn locate(timeout: Duration) -> Result<Self> {
        let binary = which::which("systemctl")
            .map_err(|e| MonitorError::Config(format!("systemctl not found: {}", e)))?;
        debug!(path = %binary.display(), "Resolved systemctl");
        Self::with_binary(binary, timeout)
    }

    fn with_binary(binary: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let property_line = Regex::new(PROPERTY_LINE)
            .map_err(|e| MonitorError::Config(format!("property pattern: {}", e)))?;
        Ok(Self {
            binary: binary.into(),
            timeout,
            property_line,
        })
    }

    /// Extract `value` from the `name=value` line of `systemctl show` output
    fn parse_property(&self, output: &str, name: &str) -> Option<String> {
        self.property_line
            .captures_iter(output)
            .find(|c| &c[1] == name)
            .map(|c| c[2].trim().to_string())
    }

    async fn show_property(&self, service: &str, property: &str) -> Result<String> {
        let property_arg = format!("--property={}", property);
        let binary = self.binary.to_string_lossy();
        let output = run_bounded(&binary, &["show", service, &property_arg], self.timeout)
            .await
            .map_err(|e| MonitorError::Sampling(e.to_string()))?;

        self.parse_property(&output, property).ok_or_else(|| {
            MonitorError::Sampling(format!("{} missing from systemctl output", property))
        })
    }
}

#[async_trait]
impl ProcessManager for SystemctlClient {
    async fn active_state(&self, service: &str) -> Result<ServiceStatus> {
        self.show_property(service, "ActiveState").await?.parse()
    }

    async fn active_enter_timestamp(&self, service: &str) -> Result<String> {
        let ts = self.show_property(service, "ActiveEnterTimestamp").await?;
        if ts.is_empty() {
            // Never activated since boot
            return Err(MonitorError::Sampling(format!(
                "{} has no activation timestamp",
                service
            )));
        }
        Ok(ts)
    }
}
