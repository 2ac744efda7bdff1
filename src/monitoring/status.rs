//! 挖矿状态汇总
//!
//! 运行时轮询挖矿程序自带的HTTP接口 `/1/summary` 获取算力与线程数，
//! 并结合日志推断与矿池探测给出连接状态。任何轮询失败都只会让对应字段保持为0。

use crate::config::HttpConfig;
use crate::process::ProcessSupervisor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 状态接口轮询超时
pub const SUMMARY_TIMEOUT: Duration = Duration::from_secs(3);

/// 挖矿状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinerStatus {
    pub running: bool,
    /// H/s
    pub hashrate: f64,
    pub threads: u32,
    /// 运行秒数
    pub uptime: u64,
    pub pool: String,
    pub algorithm: String,
    pub connected: bool,
}

/// `/1/summary` 响应中用到的部分
///
/// 挖矿程序刚启动时算力数组里是 null 而不是 0。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryResponse {
    #[serde(default)]
    pub hashrate: SummaryHashrate,
    #[serde(default)]
    pub resources: SummaryResources,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryHashrate {
    #[serde(default)]
    pub total: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryResources {
    #[serde(default)]
    pub threads: Option<u32>,
}

impl SummaryResponse {
    pub fn current_hashrate(&self) -> f64 {
        self.hashrate.total.first().copied().flatten().unwrap_or(0.0)
    }

    pub fn threads(&self) -> u32 {
        self.resources.threads.unwrap_or(0)
    }
}

/// 状态接口地址；监听所有地址时改为访问本机
pub fn summary_url(http: &HttpConfig) -> String {
    let host = match http.host.trim() {
        "" | "0.0.0.0" => "127.0.0.1",
        "::" => "[::1]",
        host if host.contains(':') && !host.starts_with('[') => {
            return format!("http://[{}]:{}/1/summary", host, http.port);
        }
        host => host,
    };
    format!("http://{}:{}/1/summary", host, http.port)
}

/// 状态汇总器
pub struct StatusReporter {
    supervisor: Arc<ProcessSupervisor>,
    client: reqwest::Client,
}

impl StatusReporter {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SUMMARY_TIMEOUT)
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { supervisor, client }
    }

    /// 获取当前状态，未运行时返回全零快照
    pub async fn get_status(&self) -> MinerStatus {
        let session = self.supervisor.snapshot().await;
        if !session.running() {
            return MinerStatus::default();
        }

        let mut status = MinerStatus {
            running: true,
            uptime: session.uptime().as_secs(),
            ..Default::default()
        };

        let config = match self.supervisor.config_store().load() {
            Ok(config) => config,
            Err(e) => {
                debug!("Status without config: {}", e);
                return status;
            }
        };

        if config.http.enabled {
            match self.fetch_summary(&config.http).await {
                Ok(summary) => {
                    status.hashrate = summary.current_hashrate();
                    status.threads = summary.threads();
                }
                Err(e) => debug!("Summary poll failed: {}", e),
            }
        }

        let Some(first) = config.pools.first() else {
            return status;
        };
        status.pool = first.url.clone();
        status.algorithm = first.algo.clone().unwrap_or_default();

        status.connected = session.pool_connected
            || self
                .supervisor
                .probe()
                .is_reachable(&first.url, self.supervisor.probe_timeout())
                .await;

        status
    }

    pub async fn fetch_summary(&self, http: &HttpConfig) -> Result<SummaryResponse, reqwest::Error> {
        let mut request = self.client.get(summary_url(http)).timeout(SUMMARY_TIMEOUT);
        if let Some(token) = http.access_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?.json().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::MinerBinary;
    use crate::config::ConfigStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 只回应一次的HTTP桩服务，返回收到的请求
    async fn serve_once(body: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (port, handle)
    }

    fn reporter() -> (tempfile::TempDir, StatusReporter) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let supervisor = ProcessSupervisor::new(store, MinerBinary::Path(dir.path().join("xmrig")));
        (dir, StatusReporter::new(Arc::new(supervisor)))
    }

    #[test]
    fn test_summary_parsing() {
        let summary: SummaryResponse = serde_json::from_str(
            r#"{"worker_id":"rig","hashrate":{"total":[1523.4,1500.0,null],"highest":1600.0},"resources":{"threads":8,"memory":{}}}"#,
        )
        .unwrap();
        assert_eq!(summary.current_hashrate(), 1523.4);
        assert_eq!(summary.threads(), 8);

        let summary: SummaryResponse =
            serde_json::from_str(r#"{"hashrate":{"total":[null,null,null]},"resources":{}}"#).unwrap();
        assert_eq!(summary.current_hashrate(), 0.0);
        assert_eq!(summary.threads(), 0);
    }

    #[test]
    fn test_summary_url() {
        let mut http = ConfigStore::default_config().http;
        assert_eq!(summary_url(&http), "http://127.0.0.1:3649/1/summary");
        http.host = "0.0.0.0".into();
        assert_eq!(summary_url(&http), "http://127.0.0.1:3649/1/summary");
        http.host = "::1".into();
        assert_eq!(summary_url(&http), "http://[::1]:3649/1/summary");
    }

    #[tokio::test]
    async fn test_fetch_summary_from_stub() {
        let (port, server) =
            serve_once(r#"{"hashrate":{"total":[2048.5]},"resources":{"threads":4}}"#).await;
        let (_dir, reporter) = reporter();

        let mut http = ConfigStore::default_config().http;
        http.port = port;
        http.access_token = Some("secret".into());

        let summary = reporter.fetch_summary(&http).await.unwrap();
        assert_eq!(summary.current_hashrate(), 2048.5);
        assert_eq!(summary.threads(), 4);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /1/summary "));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn test_fetch_summary_fails_on_closed_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (_dir, reporter) = reporter();
        let mut http = ConfigStore::default_config().http;
        http.port = port;
        assert!(reporter.fetch_summary(&http).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_summary_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let (_dir, reporter) = reporter();
        let mut http = ConfigStore::default_config().http;
        http.port = port;

        let started = std::time::Instant::now();
        let result = reporter.fetch_summary(&http).await;
        assert!(result.is_err());
        assert!(started.elapsed() < SUMMARY_TIMEOUT + Duration::from_secs(2));
        server.abort();
    }

    #[tokio::test]
    async fn test_status_when_idle_is_zeroed() {
        let (_dir, reporter) = reporter();
        assert_eq!(reporter.get_status().await, MinerStatus::default());
    }
}
