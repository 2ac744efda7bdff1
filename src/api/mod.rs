//! 面向前端（GUI/CLI）的挖矿接口

use crate::config::{ConfigStore, MinerConfig};
use crate::error::SupervisorError;
use crate::monitoring::{system, MinerStatus, StatusReporter, SystemInfo};
use crate::process::{ProcessSupervisor, SupervisorEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 挖矿接口
pub struct MinerApi {
    supervisor: Arc<ProcessSupervisor>,
    reporter: StatusReporter,
}

impl MinerApi {
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        let supervisor = Arc::new(supervisor);
        Self {
            reporter: StatusReporter::new(supervisor.clone()),
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    fn store(&self) -> &ConfigStore {
        self.supervisor.config_store()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }

    pub async fn start_mining(&self) -> Result<(), SupervisorError> {
        self.supervisor.start().await
    }

    pub async fn stop_mining(&self) {
        self.supervisor.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.is_running().await
    }

    pub async fn get_miner_status(&self) -> MinerStatus {
        self.reporter.get_status().await
    }

    pub async fn get_system_info(&self) -> SystemInfo {
        system::collect(self.supervisor.binary()).await
    }

    pub async fn get_logs(&self) -> Vec<String> {
        self.supervisor.logs().await
    }

    pub async fn clear_logs(&self) {
        self.supervisor.clear_logs().await
    }

    pub fn load_config(&self) -> Result<MinerConfig, SupervisorError> {
        Ok(self.store().load()?)
    }

    /// 保存配置；运行中禁止修改
    pub async fn save_config(&self, config: &MinerConfig) -> Result<(), SupervisorError> {
        if self.supervisor.is_running().await {
            warn!("Rejected config change while mining is running");
            return Err(SupervisorError::ConfigLocked);
        }
        self.store().save(config)?;
        info!("Configuration saved");
        Ok(())
    }

    pub fn get_default_config(&self) -> MinerConfig {
        ConfigStore::default_config()
    }

    /// 应用退出时调用
    pub async fn shutdown(&self) {
        self.supervisor.stop().await
    }
}
