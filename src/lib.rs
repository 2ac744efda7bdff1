//! Miner Supervisor - XMRig挖矿程序的桌面端监管库
//!
//! 负责挖矿程序的整个生命周期：
//! - 配置文档的持久化与合并保存（保留未知字段）
//! - 启动前的矿池可达性探测与故障转移
//! - 子进程的启动、输出采集与终止
//! - 运行状态汇总与系统信息采集
//!
//! 前端（GUI或命令行）通过 [`MinerApi`] 调用上述功能，
//! 并通过订阅 [`process::SupervisorEvent`] 接收日志与停止通知。

pub mod api;
pub mod bundle;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitoring;
pub mod pool;
pub mod process;
pub mod utils;

pub use api::MinerApi;
pub use config::{ConfigStore, MinerConfig, PoolEntry};
pub use error::SupervisorError;
pub use process::{ProcessSupervisor, SupervisorEvent};

/// 程序版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 程序名称
pub const NAME: &str = "miner-supervisor";
