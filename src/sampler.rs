//! 状态采样 - 每个 tick 查询一次进程管理器

use std::sync::Arc;
use tracing::warn;

use crate::error::{MonitorError, Result};
use crate::infra::ProcessManager;
use crate::status::ServiceStatus;

/// Result of one sample; `failure` is set when `status` was downgraded to `Unknown`
#[derive(Debug)]
pub struct Sample {
    pub status: ServiceStatus,
    pub failure: Option<MonitorError>,
}

impl Sample {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Reads the watched service's state from the process manager
pub struct StatusSampler {
    service: String,
    manager: Arc<dyn ProcessManager>,
}

impl StatusSampler {
    pub fn new(service: impl Into<String>, manager: Arc<dyn ProcessManager>) -> Self {
        Self {
            service: service.into(),
            manager,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current status, or `Unknown` with the failure attached
    pub async fn sample(&self) -> Sample {
        match self.manager.active_state(&self.service).await {
            Ok(status) => Sample {
                status,
                failure: None,
            },
            Err(e) => {
                warn!(service = %self.service, error = %e, "Sampling failed, status unknown");
                Sample {
                    status: ServiceStatus::Unknown,
                    failure: Some(e),
                }
            }
        }
    }

    /// Raw activation timestamp, for timestamp-mode deployments
    pub async fn sample_timestamp(&self) -> Result<String> {
        self.manager.active_enter_timestamp(&self.service).await
    }
}
