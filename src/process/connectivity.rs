//! 根据挖矿程序输出判断矿池连接状态
//!
//! 这是基于关键字的启发式规则，挖矿程序修改日志措辞后可能失效。

const CONNECTED_KEYWORDS: &[&str] = &["new job", "connected", "login succeeded"];
const FAILURE_KEYWORDS: &[&str] = &["failed", "error", "banned", "access denied", "timeout"];
const NETWORK_KEYWORDS: &[&str] = &["pool", "net"];

/// 返回 `Some(true)` 表示已连接，`Some(false)` 表示断开，`None` 表示无关
///
/// 同一行同时命中两类规则时以断开为准。
pub fn classify(line: &str) -> Option<bool> {
    let lower = line.to_lowercase();
    let mut verdict = None;

    if CONNECTED_KEYWORDS.iter().any(|k| lower.contains(k)) {
        verdict = Some(true);
    }

    if FAILURE_KEYWORDS.iter().any(|k| lower.contains(k))
        && NETWORK_KEYWORDS.iter().any(|k| lower.contains(k))
    {
        verdict = Some(false);
    }

    verdict
}
