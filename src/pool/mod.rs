pub mod probe;
pub mod switcher;

use std::time::Duration;

pub use probe::{parse_pool_address, NetworkProbe, PoolAddress, PoolProbe, StaticProbe};
pub use switcher::{failover_order, promote, select_reachable};

/// 默认探测超时
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
