//! 矿池故障转移：启动前选择第一个可用矿池并调整顺序

use crate::config::PoolEntry;
use crate::error::PoolError;
use crate::pool::PoolProbe;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 按列表顺序探测已启用的矿池，返回第一个可达矿池的下标
pub async fn select_reachable(
    pools: &[PoolEntry],
    probe: &dyn PoolProbe,
    timeout: Duration,
) -> Option<usize> {
    for (index, pool) in pools.iter().enumerate() {
        if !pool.enabled {
            debug!("Skipping disabled pool {}: {}", index, pool.url);
            continue;
        }

        let started = Instant::now();
        if probe.is_reachable(&pool.url, timeout).await {
            info!("Pool {} reachable: {} ({:?})", index, pool.url, started.elapsed());
            return Some(index);
        }
        warn!("Pool {} unreachable: {}", index, pool.url);
    }
    None
}

/// 把指定矿池移动到首位，其余矿池保持相对顺序
pub fn promote(pools: &[PoolEntry], index: usize) -> Vec<PoolEntry> {
    let mut reordered = Vec::with_capacity(pools.len());
    if let Some(chosen) = pools.get(index) {
        reordered.push(chosen.clone());
    }
    reordered.extend(
        pools
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, pool)| pool.clone()),
    );
    reordered
}

/// 故障转移
///
/// 返回 `Ok(None)` 表示首个矿池即可用无需调整；`Ok(Some(index))` 为需要移到首位的矿池下标。
pub async fn failover_order(
    pools: &[PoolEntry],
    probe: &dyn PoolProbe,
    timeout: Duration,
) -> Result<Option<usize>, PoolError> {
    match select_reachable(pools, probe, timeout).await {
        Some(0) => Ok(None),
        Some(index) => {
            info!("Failing over to pool {}: {}", index, pools[index].url);
            Ok(Some(index))
        }
        None => Err(PoolError::NoReachablePool),
    }
}
