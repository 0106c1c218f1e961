//! 传输 trait 定义和事件 payload

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::detector::Transition;
use crate::error::Result;

/// Event name for every status report
pub const SERVICE_STATUS_EVENT: &str = "service_status";

/// Status reported for a timestamp-mode restart
pub const RESTARTED_STATUS: &str = "restarted";

/// Payload sent with `service_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatusEvent {
    pub service: String,
    pub status: String,
    /// RFC 3339, UTC
    pub timestamp: String,
}

impl ServiceStatusEvent {
    pub fn new(service: impl Into<String>, status: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            service: service.into(),
            status: status.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn from_transition(service: &str, transition: &Transition) -> Self {
        Self::new(service, transition.current.as_str(), transition.timestamp)
    }

    pub fn restarted(service: &str, at: DateTime<Utc>) -> Self {
        Self::new(service, RESTARTED_STATUS, at)
    }
}

/// Receives the transport's asynchronous connection notifications
pub trait ConnectionListener: Send + Sync {
    fn on_connect(&self);
    fn on_disconnect(&self, reason: &str);
}

/// Persistent, authenticated event channel to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection, authenticating with `credential`.
    ///
    /// On success the transport calls `listener.on_connect()` and later
    /// `listener.on_disconnect()` when the connection drops.
    async fn connect(
        &self,
        url: &str,
        credential: &str,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<()>;

    /// Fire-and-forget emission; no acknowledgement
    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()>;

    async fn close(&self);
}
