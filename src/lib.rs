//! Validator Monitor - 监控 systemd 服务生命周期并上报状态变化到远程 collector

pub mod config;
pub mod delivery;
pub mod detector;
pub mod error;
pub mod infra;
pub mod monitor;
pub mod sampler;
pub mod shutdown;
pub mod state_file;
pub mod status;

pub use config::{AgentConfig, RetryConfig, SamplingMode};
pub use delivery::{
    ConnectionListener, ConnectionState, DeliveryChannel, DeliveryOutcome, RetryPolicy,
    ServiceStatusEvent, SuppressReason, TcpTransport, Transport,
};
pub use detector::{ObservedState, RestartCheck, RestartDetector, Transition, TransitionDetector, TransitionKind};
pub use error::{MonitorError, Result};
pub use infra::{IdentityProbe, ProcessManager, SystemctlClient};
pub use monitor::{LoopTiming, MonitorAgent, TickReport};
pub use sampler::{Sample, StatusSampler};
pub use state_file::LastValueFile;
pub use status::ServiceStatus;
