//! 基础设施层 - systemctl、身份查询、外部命令

pub mod command;
pub mod identity;
pub mod systemctl;

pub use command::run_bounded;
pub use identity::IdentityProbe;
pub use systemctl::{ProcessManager, SystemctlClient};
