use crate::bundle::{BundleLayout, RUNTIME_DIR_NAME};
use crate::error::ConfigError;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};


#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Runtime directory holding config.json and the extracted miner
    #[arg(long)]
    pub runtime_dir: Option<PathBuf>,

    /// Bundle directory with per-platform miner artifacts
    #[arg(long)]
    pub bundle_dir: Option<PathBuf>,

    /// Use this miner executable instead of the bundled one
    #[arg(long)]
    pub executable: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Pool probe timeout in milliseconds
    #[arg(long, default_value = "2000")]
    pub probe_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the miner and supervise it until Ctrl-C
    Run {
        /// Seconds between status reports, 0 disables them
        #[arg(long, default_value = "30")]
        status_interval: u64,
    },
    /// Print system information
    Sysinfo,
    /// Inspect or edit the miner configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the persisted configuration
    Show,
    /// Print the built-in default configuration
    Default,
    /// Overwrite known fields with the built-in defaults
    Reset,
    /// Replace the pool list with a single pool
    SetPool {
        url: String,
        user: String,
        #[arg(long, default_value = "x")]
        pass: String,
        #[arg(long)]
        tls: bool,
    },
}

/// 挖矿程序配置文档（XMRig格式）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub api: ApiConfig,
    pub http: HttpConfig,
    pub autosave: bool,
    pub cpu: CpuConfig,
    pub pools: Vec<PoolEntry>,
    pub randomx: RandomXConfig,
    #[serde(rename = "log-file")]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ApiConfig {
    pub id: Option<String>,
    pub worker_id: Option<String>,
}

/// 状态接口配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub access_token: Option<String>,
    pub restricted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CpuConfig {
    pub enabled: bool,
    pub huge_pages: bool,
    pub max_threads_hint: u32,
    pub priority: Option<i32>,
    pub asm: bool,
}

/// 矿池条目
///
/// 未建模的键（`keepalive`、`tls-fingerprint`、`socks5` 等）保存在 `extra` 中原样写回。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PoolEntry {
    pub algo: Option<String>,
    pub coin: Option<String>,
    pub url: String,
    pub user: String,
    pub pass: String,
    pub rig_id: Option<String>,
    pub nicehash: bool,
    pub enabled: bool,
    pub tls: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RandomXConfig {
    pub init: i32,
    pub init_avx2: i32,
    pub mode: String,
    #[serde(rename = "1gb-pages")]
    pub one_gb_pages: bool,
    pub numa: bool,
}

impl Default for PoolEntry {
    /// 缺少 `enabled` 的条目按启用处理
    fn default() -> Self {
        Self {
            algo: None,
            coin: None,
            url: String::new(),
            user: String::new(),
            pass: String::new(),
            rig_id: None,
            nicehash: false,
            enabled: true,
            tls: false,
            extra: Map::new(),
        }
    }
}

impl PoolEntry {
    pub fn new(url: impl Into<String>, user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            pass: pass.into(),
            ..Default::default()
        }
    }
}

/// 配置存储：负责磁盘上的JSON文档
#[derive(Debug, Clone)]
pub struct ConfigStore {
    runtime_dir: PathBuf,
    bundle: Option<BundleLayout>,
}

impl ConfigStore {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            bundle: None,
        }
    }

    /// 使用发行包中的平台默认配置作为初始文档
    pub fn with_bundle(mut self, bundle: BundleLayout) -> Self {
        self.bundle = Some(bundle);
        self
    }

    pub fn default_runtime_dir() -> PathBuf {
        std::env::temp_dir().join(RUNTIME_DIR_NAME)
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// 配置文件路径，运行时目录不存在时创建
    pub fn config_path(&self) -> PathBuf {
        if let Err(e) = fs::create_dir_all(&self.runtime_dir) {
            warn!("Failed to create runtime dir {}: {}", self.runtime_dir.display(), e);
        }
        self.runtime_dir.join("config.json")
    }

    /// 确保配置文件存在：优先使用发行包配置，否则写入内置默认配置
    pub fn ensure_exists(&self) -> Result<(), ConfigError> {
        let path = self.config_path();
        if path.exists() {
            return Ok(());
        }

        if let Some(bundle) = &self.bundle {
            let seed = bundle.bundled_config();
            match fs::read(&seed) {
                Ok(data) => {
                    fs::write(&path, data).map_err(|e| ConfigError::io(&path, e))?;
                    info!("Seeded config from {}", seed.display());
                    return Ok(());
                }
                Err(e) => debug!("No bundled config at {}: {}", seed.display(), e),
            }
        }

        info!("Writing built-in default config to {}", path.display());
        self.save(&Self::default_config())
    }

    pub fn load(&self) -> Result<MinerConfig, ConfigError> {
        self.ensure_exists()?;

        let path = self.config_path();
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::parse(&path, e))
    }

    /// 读取现有文档为通用JSON树，文件不存在时返回 None
    pub fn read_value(&self) -> Result<Option<Value>, ConfigError> {
        let path = self.config_path();
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| ConfigError::parse(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::io(&path, e)),
        }
    }

    pub fn save(&self, config: &MinerConfig) -> Result<(), ConfigError> {
        let updates = serde_json::to_value(config).map_err(|e| ConfigError::Serialize {
            error: e.to_string(),
        })?;
        self.save_value(updates)
    }

    /// 合并保存：只覆盖传入的键，未知键原样保留
    pub fn save_value(&self, updates: Value) -> Result<(), ConfigError> {
        let merged = match self.read_value()? {
            Some(mut existing) => {
                merge_json(&mut existing, updates);
                existing
            }
            None => updates,
        };

        let path = self.config_path();
        write_pretty(&path, &merged)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// 把指定下标的矿池移到首位
    ///
    /// 直接在原始文档的 `pools` 数组上移动条目，条目内容一个字节都不改。
    pub fn promote_pool(&self, index: usize) -> Result<(), ConfigError> {
        let path = self.config_path();
        let mut document = self
            .read_value()?
            .ok_or_else(|| ConfigError::io(&path, "config file not found"))?;

        let Some(pools) = document.get_mut("pools").and_then(Value::as_array_mut) else {
            warn!("No pools array in {}", path.display());
            return Ok(());
        };
        if index == 0 || index >= pools.len() {
            return Ok(());
        }

        let chosen = pools.remove(index);
        pools.insert(0, chosen);
        write_pretty(&path, &document)?;
        debug!("Moved pool {} to the front of {}", index, path.display());
        Ok(())
    }

    /// 内置默认配置（不会自动持久化）
    pub fn default_config() -> MinerConfig {
        MinerConfig {
            api: ApiConfig::default(),
            http: HttpConfig {
                enabled: true,
                host: "127.0.0.1".to_string(),
                port: 3649,
                access_token: None,
                restricted: true,
            },
            autosave: true,
            cpu: CpuConfig {
                enabled: true,
                huge_pages: true,
                max_threads_hint: 100,
                priority: None,
                asm: true,
            },
            pools: vec![PoolEntry::new(
                "stratum+ssl://equal.xdagminer.com:13003",
                "NNZabJQEhrQGTPabqABWVK9v3rSsNQ7Sy",
                "x",
            )],
            randomx: RandomXConfig {
                init: -1,
                init_avx2: -1,
                mode: "auto".to_string(),
                one_gb_pages: false,
                numa: true,
            },
            log_file: None,
        }
    }
}

/// 递归合并：对象按键合并，数组整体替换，标量（包括 null）直接覆盖
pub fn merge_json(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, value) in src_map {
                match dst_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        dst_map.insert(key, value);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

fn write_pretty(path: &Path, value: &Value) -> Result<(), ConfigError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser).map_err(|e| ConfigError::Serialize {
        error: e.to_string(),
    })?;

    // 先写临时文件再重命名，避免写到一半的文档
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &buf).map_err(|e| ConfigError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| ConfigError::io(path, e))
}

/// 构造只包含 pools 的局部更新
pub fn pools_update(pools: &[PoolEntry]) -> Result<Value, ConfigError> {
    let pools = serde_json::to_value(pools).map_err(|e| ConfigError::Serialize {
        error: e.to_string(),
    })?;
    let mut map = Map::new();
    map.insert("pools".to_string(), pools);
    Ok(Value::Object(map))
}
