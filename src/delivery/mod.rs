//! 投递层 - 发送状态事件到远程 collector
//!
//! 单条持久连接，线性重试有上限；`notify` 经过过滤后发出，不等待确认

pub mod channel;
pub mod retry;
pub mod tcp;
pub mod transport;

pub use channel::{ConnectionState, DeliveryChannel, DeliveryOutcome, SuppressReason};
pub use retry::RetryPolicy;
pub use tcp::TcpTransport;
pub use transport::{ConnectionListener, ServiceStatusEvent, Transport, SERVICE_STATUS_EVENT};
