//! 算力与运行时长的显示格式

use std::time::Duration;

const UNITS: [&str; 4] = ["H/s", "KH/s", "MH/s", "GH/s"];

/// 按数量级选择单位，保留两位小数
///
/// CPU挖矿的算力通常在 H/s 到 MH/s 之间，超过 GH/s 的部分不再继续换算。
pub fn format_hashrate(hashrate: f64) -> String {
    if !hashrate.is_finite() || hashrate <= 0.0 {
        return "0.00 H/s".to_string();
    }

    let mut value = hashrate;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// `1d 02:03:04` 或 `02:03:04`
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hashrate() {
        assert_eq!(format_hashrate(0.0), "0.00 H/s");
        assert_eq!(format_hashrate(-5.0), "0.00 H/s");
        assert_eq!(format_hashrate(f64::NAN), "0.00 H/s");
        assert_eq!(format_hashrate(850.0), "850.00 H/s");
        assert_eq!(format_hashrate(1523.4), "1.52 KH/s");
        assert_eq!(format_hashrate(2_500_000.0), "2.50 MH/s");
        assert_eq!(format_hashrate(4_200_000_000_000.0), "4200.00 GH/s");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_uptime(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_uptime(Duration::from_secs(86_400 + 7384)), "1d 02:03:04");
    }
}
