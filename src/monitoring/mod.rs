//! 状态与系统信息

pub mod status;
pub mod system;

pub use status::{MinerStatus, StatusReporter, SummaryResponse};
pub use system::SystemInfo;
