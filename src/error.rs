use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Miner is already running")]
    AlreadyRunning,

    #[error("No reachable pool, check the pool configuration")]
    NoReachablePool,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Configuration cannot be modified while mining is running")]
    ConfigLocked,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {path}, error: {error}")]
    Io { path: String, error: String },

    #[error("Parse error: {path}, error: {error}")]
    Parse { path: String, error: String },

    #[error("Serialize error: {error}")]
    Serialize { error: String },
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("No enabled pool answered the probe")]
    NoReachablePool,
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Executable not found: {path}")]
    ExecutableNotFound { path: String },

    #[error("Failed to extract {path}: {error}")]
    Extract { path: String, error: String },

    #[error("Failed to spawn {path}: {error}")]
    Spawn { path: String, error: String },
}

impl From<PoolError> for SupervisorError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::NoReachablePool => SupervisorError::NoReachablePool,
        }
    }
}

impl ConfigError {
    pub fn io(path: impl AsRef<std::path::Path>, error: impl std::fmt::Display) -> Self {
        ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: error.to_string(),
        }
    }

    pub fn parse(path: impl AsRef<std::path::Path>, error: impl std::fmt::Display) -> Self {
        ConfigError::Parse {
            path: path.as_ref().display().to_string(),
            error: error.to_string(),
        }
    }
}

impl SupervisorError {
    /// 调用方是否可以通过修改配置后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, SupervisorError::NoReachablePool | SupervisorError::Launch(_))
    }
}
