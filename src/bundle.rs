//! 内置挖矿程序的目录布局与提取
//!
//! 发行包中每个平台一个子目录，例如 `xmrig-windows-amd64/`，其中包含
//! 可执行文件、默认配置 `config.json` 以及可选的驱动文件。
//! 运行前会把这些文件复制到运行时目录。

use crate::error::LaunchError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 默认运行时目录名（位于系统临时目录下）
pub const RUNTIME_DIR_NAME: &str = "xmrig-runtime";

/// 发行包布局
#[derive(Debug, Clone)]
pub struct BundleLayout {
    /// 发行包根目录
    pub bundle_dir: PathBuf,
    /// 运行时目录
    pub runtime_dir: PathBuf,
}

impl BundleLayout {
    pub fn new(bundle_dir: impl Into<PathBuf>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            runtime_dir: runtime_dir.into(),
        }
    }

    /// 当前平台对应的子目录名
    pub fn platform_dir() -> String {
        let arch = if std::env::consts::ARCH == "aarch64" {
            "arm64"
        } else {
            "amd64"
        };
        format!("xmrig-{}-{}", std::env::consts::OS, arch)
    }

    pub fn executable_name() -> &'static str {
        if cfg!(windows) {
            "xmrig.exe"
        } else {
            "xmrig"
        }
    }

    pub fn driver_name() -> &'static str {
        "WinRing0x64.sys"
    }

    fn platform_path(&self) -> PathBuf {
        self.bundle_dir.join(Self::platform_dir())
    }

    /// 发行包中附带的默认配置
    pub fn bundled_config(&self) -> PathBuf {
        self.platform_path().join("config.json")
    }

    /// 提取可执行文件（必需）和驱动文件（可选），返回可执行文件路径
    pub fn resolve(&self) -> Result<PathBuf, LaunchError> {
        fs::create_dir_all(&self.runtime_dir).map_err(|e| LaunchError::Extract {
            path: self.runtime_dir.display().to_string(),
            error: e.to_string(),
        })?;

        let exe_dest = self.runtime_dir.join(Self::executable_name());
        extract(&self.platform_path().join(Self::executable_name()), &exe_dest)?;

        let driver_dest = self.runtime_dir.join(Self::driver_name());
        if let Err(e) = extract(&self.platform_path().join(Self::driver_name()), &driver_dest) {
            warn!("Driver file not extracted: {}", e);
        }

        Ok(exe_dest)
    }
}

/// 复制文件到目标路径；目标已存在且大小一致时跳过
pub fn extract(src: &Path, dest: &Path) -> Result<(), LaunchError> {
    let src_meta = fs::metadata(src).map_err(|_| LaunchError::ExecutableNotFound {
        path: src.display().to_string(),
    })?;

    if let Ok(dest_meta) = fs::metadata(dest) {
        if dest_meta.len() == src_meta.len() {
            debug!("{} already extracted", dest.display());
            return Ok(());
        }
    }

    fs::copy(src, dest).map_err(|e| LaunchError::Extract {
        path: dest.display().to_string(),
        error: e.to_string(),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, fs::Permissions::from_mode(0o755)).map_err(|e| {
            LaunchError::Extract {
                path: dest.display().to_string(),
                error: e.to_string(),
            }
        })?;
    }

    info!("Extracted {} -> {}", src.display(), dest.display());
    Ok(())
}

/// 挖矿程序来源
#[derive(Debug, Clone)]
pub enum MinerBinary {
    /// 从发行包提取
    Bundled(BundleLayout),
    /// 直接使用已存在的可执行文件
    Path(PathBuf),
}

impl MinerBinary {
    pub fn resolve(&self) -> Result<PathBuf, LaunchError> {
        match self {
            MinerBinary::Bundled(layout) => layout.resolve(),
            MinerBinary::Path(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(LaunchError::ExecutableNotFound {
                        path: path.display().to_string(),
                    })
                }
            }
        }
    }

    /// 按名称清理进程时使用的映像名
    pub fn image_name(&self) -> String {
        match self {
            MinerBinary::Bundled(_) => BundleLayout::executable_name().to_string(),
            MinerBinary::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| BundleLayout::executable_name().to_string()),
        }
    }
}
