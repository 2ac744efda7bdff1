//! 系统信息采集

use crate::bundle::MinerBinary;
use crate::process::terminate::silent_command;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::System;
use tokio::time::timeout;
use tracing::debug;

const UNKNOWN: &str = "Unknown";

/// 系统信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpu_model: String,
    pub cpu_cores: usize,
    /// 字节
    pub total_memory: u64,
    #[serde(rename = "xmrigVersion")]
    pub miner_version: String,
}

pub async fn collect(binary: &MinerBinary) -> SystemInfo {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let cpu_cores = match system.cpus().len() {
        0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        n => n,
    };

    SystemInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpu_model,
        cpu_cores,
        total_memory: system.total_memory(),
        miner_version: miner_version(binary).await,
    }
}

/// 运行 `<miner> --version` 获取版本号
pub async fn miner_version(binary: &MinerBinary) -> String {
    let exe_path = match binary.resolve() {
        Ok(path) => path,
        Err(e) => {
            debug!("Cannot resolve miner for version check: {}", e);
            return UNKNOWN.to_string();
        }
    };

    let mut command = silent_command(&exe_path.to_string_lossy());
    command.arg("--version").stdout(Stdio::piped());

    match timeout(Duration::from_secs(5), command.output()).await {
        Ok(Ok(output)) => parse_version(&String::from_utf8_lossy(&output.stdout)),
        Ok(Err(e)) => {
            debug!("Version check failed: {}", e);
            UNKNOWN.to_string()
        }
        Err(_) => {
            debug!("Version check timed out");
            UNKNOWN.to_string()
        }
    }
}

/// 第一行形如 `XMRig 6.24.0` 时取版本号，否则返回整行
pub fn parse_version(output: &str) -> String {
    let line = output.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return UNKNOWN.to_string();
    }
    if line.contains("XMRig") {
        if let Some(version) = line.split_whitespace().nth(1) {
            return version.to_string();
        }
    }
    line.to_string()
}
