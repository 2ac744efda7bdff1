//! 矿池可达性探测

use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// 矿池探测接口
#[async_trait]
pub trait PoolProbe: Send + Sync {
    /// 在给定超时内判断矿池是否可连接
    async fn is_reachable(&self, url: &str, timeout: Duration) -> bool;
}

/// 矿池地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAddress {
    pub host: String,
    pub port: u16,
    /// 是否使用加密传输
    pub tls: bool,
}

impl PoolAddress {
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// 解析矿池URL
///
/// 协议名包含 `ssl` 或 `tls` 时视为加密连接；未指定端口时加密默认443，明文默认80。
pub fn parse_pool_address(url: &str) -> Option<PoolAddress> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    let (tls, rest) = match url.find("://") {
        Some(idx) => {
            let scheme = url[..idx].to_ascii_lowercase();
            (scheme.contains("ssl") || scheme.contains("tls"), &url[idx + 3..])
        }
        None => (false, url),
    };

    let authority = rest.split('/').next().unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    let default_port = if tls { 443 } else { 80 };

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let end = bracketed.find(']')?;
        let port = match &bracketed[end + 1..] {
            "" => default_port,
            tail => tail.strip_prefix(':')?.parse().ok()?,
        };
        (&bracketed[..end], port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (authority, default_port),
        }
    };

    if host.is_empty() {
        return None;
    }

    Some(PoolAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// 基于TCP/TLS握手的网络探测
#[derive(Debug, Clone, Default)]
pub struct NetworkProbe;

impl NetworkProbe {
    pub fn new() -> Self {
        Self
    }

    async fn handshake(address: &PoolAddress) -> io::Result<()> {
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        if !address.tls {
            return Ok(());
        }

        // 只检测存活，不校验证书
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let mut tls_stream = connector
            .connect(&address.host, stream)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let _ = tls_stream.shutdown().await;
        Ok(())
    }
}

#[async_trait]
impl PoolProbe for NetworkProbe {
    async fn is_reachable(&self, url: &str, probe_timeout: Duration) -> bool {
        let Some(address) = parse_pool_address(url) else {
            debug!("Invalid pool URL: {}", url);
            return false;
        };

        match timeout(probe_timeout, Self::handshake(&address)).await {
            Ok(Ok(())) => {
                debug!("Pool {} reachable (tls={})", address.authority(), address.tls);
                true
            }
            Ok(Err(e)) => {
                debug!("Pool {} unreachable: {}", address.authority(), e);
                false
            }
            Err(_) => {
                debug!("Pool {} probe timed out after {:?}", address.authority(), probe_timeout);
                false
            }
        }
    }
}

/// 固定结果的探测器，用于离线运行和测试
#[derive(Debug, Default)]
pub struct StaticProbe {
    reachable: HashSet<String>,
    probed: Mutex<Vec<String>>,
}

impl StaticProbe {
    pub fn new<I, S>(reachable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reachable: reachable.into_iter().map(Into::into).collect(),
            probed: Mutex::new(Vec::new()),
        }
    }

    /// 按顺序返回被探测过的URL
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PoolProbe for StaticProbe {
    async fn is_reachable(&self, url: &str, _timeout: Duration) -> bool {
        if let Ok(mut probed) = self.probed.lock() {
            probed.push(url.to_string());
        }
        self.reachable.contains(url)
    }
}
