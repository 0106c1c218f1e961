//! 服务状态 - systemd ActiveState 的归一化表示

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MonitorError;

/// Lifecycle state of the watched service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Failed,
    Deactivating,
    Activating,
    /// Sampling failed
    Unknown,
}

impl ServiceStatus {
    pub const ALL: [ServiceStatus; 6] = [
        ServiceStatus::Active,
        ServiceStatus::Inactive,
        ServiceStatus::Failed,
        ServiceStatus::Deactivating,
        ServiceStatus::Activating,
        ServiceStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Deactivating => "deactivating",
            ServiceStatus::Activating => "activating",
            ServiceStatus::Unknown => "unknown",
        }
    }

    /// Degraded states the collector wants to hear about
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Inactive | ServiceStatus::Deactivating | ServiceStatus::Failed
        )
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = MonitorError;

    /// Parses a systemd `ActiveState` value
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "active" | "reloading" | "refreshing" => Ok(ServiceStatus::Active),
            // 清理等维护操作期间服务未运行
            "inactive" | "maintenance" => Ok(ServiceStatus::Inactive),
            "failed" => Ok(ServiceStatus::Failed),
            "deactivating" => Ok(ServiceStatus::Deactivating),
            "activating" => Ok(ServiceStatus::Activating),
            "unknown" => Ok(ServiceStatus::Unknown),
            other => Err(MonitorError::Sampling(format!(
                "unrecognized ActiveState: {:?}",
                other
            ))),
        }
    }
}
