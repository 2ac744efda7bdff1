use anyhow::{Context, Result};
use clap::Parser;
use miner_supervisor::bundle::{BundleLayout, MinerBinary};
use miner_supervisor::config::{pools_update, Args, Command, ConfigAction};
use miner_supervisor::logging::{init_logging, LogConfig, LogRotation};
use miner_supervisor::utils::{format_hashrate, format_uptime};
use miner_supervisor::{ConfigStore, MinerApi, PoolEntry, ProcessSupervisor, SupervisorEvent};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // 守卫需要持有到程序退出，否则文件日志会丢失
    let _log_guard = match init_logging(LogConfig {
        level: args.log_level.clone(),
        file_path: args.log_file.clone(),
        rotation: LogRotation::Daily,
        ..Default::default()
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return;
        }
    };

    if let Err(e) = run(args).await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn build_api(args: &Args) -> MinerApi {
    let runtime_dir = args
        .runtime_dir
        .clone()
        .unwrap_or_else(ConfigStore::default_runtime_dir);

    let bundle_dir = args.bundle_dir.clone().unwrap_or_else(default_bundle_dir);
    let layout = BundleLayout::new(bundle_dir, runtime_dir.clone());

    let store = ConfigStore::new(runtime_dir).with_bundle(layout.clone());
    let binary = match &args.executable {
        Some(path) => MinerBinary::Path(path.clone()),
        None => MinerBinary::Bundled(layout),
    };

    let supervisor = ProcessSupervisor::new(store, binary)
        .with_probe_timeout(Duration::from_millis(args.probe_timeout_ms));
    MinerApi::new(supervisor)
}

/// 默认在可执行文件旁的 `bin` 目录查找发行包
fn default_bundle_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("bin")))
        .unwrap_or_else(|| PathBuf::from("bin"))
}

async fn run(args: Args) -> Result<()> {
    let api = build_api(&args);

    match args.command {
        Command::Run { status_interval } => run_miner(&api, status_interval).await,
        Command::Sysinfo => {
            let info = api.get_system_info().await;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Config { action } => config_command(&api, action),
    }
}

async fn run_miner(api: &MinerApi, status_interval: u64) -> Result<()> {
    info!("🚀 Starting {} v{}", miner_supervisor::NAME, miner_supervisor::VERSION);

    let mut events = api.subscribe();
    if let Err(e) = api.start_mining().await {
        if e.is_retryable() {
            warn!("Check the pool list and the miner executable, then retry");
        }
        return Err(e).context("failed to start miner");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("🛑 Received shutdown signal");
                break;
            }
            event = events.recv() => match event {
                Ok(SupervisorEvent::Log(log)) => println!("[{}] {}", log.time, log.line),
                Ok(SupervisorEvent::Stopped) => {
                    warn!("Miner process exited");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} log lines", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick(), if status_interval > 0 => {
                let status = api.get_miner_status().await;
                info!(
                    "📊 {} | {} threads | uptime {} | pool {} ({})",
                    format_hashrate(status.hashrate),
                    status.threads,
                    format_uptime(Duration::from_secs(status.uptime)),
                    status.pool,
                    if status.connected { "connected" } else { "disconnected" }
                );
            }
        }
    }

    api.shutdown().await;
    info!("👋 Miner supervisor stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn config_command(api: &MinerApi, action: ConfigAction) -> Result<()> {
    let store = api.supervisor().config_store();
    match action {
        ConfigAction::Show => {
            let config = api.load_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Default => {
            println!("{}", serde_json::to_string_pretty(&api.get_default_config())?);
        }
        ConfigAction::Reset => {
            store.save(&api.get_default_config())?;
            println!("Configuration reset: {}", store.config_path().display());
        }
        ConfigAction::SetPool { url, user, pass, tls } => {
            store.ensure_exists()?;
            let mut pool = PoolEntry::new(url, user, pass);
            pool.tls = tls;
            store.save_value(pools_update(&[pool])?)?;
            println!("Pool updated: {}", store.config_path().display());
        }
    }
    Ok(())
}
