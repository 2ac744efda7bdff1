//! 实用工具模块

pub mod format;

pub use format::{format_hashrate, format_uptime};

/// 算力显示宏
///
/// ```
/// use miner_supervisor::hashrate;
///
/// assert_eq!(hashrate!(1523.4), "1.52 KH/s");
/// ```
#[macro_export]
macro_rules! hashrate {
    ($hashrate:expr) => {
        $crate::utils::format_hashrate($hashrate)
    };
}
