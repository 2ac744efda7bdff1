//! 挖矿进程监管
//!
//! 负责启动、停止挖矿程序，采集输出并跟踪进程生命周期。
//! 会话状态（运行阶段、启动时间、日志、连接标志）由一把读写锁保护，
//! 锁不会跨越进程创建、网络探测或读流等阻塞操作。

pub mod connectivity;
pub mod log_buffer;
pub mod terminate;

use crate::bundle::MinerBinary;
use crate::config::ConfigStore;
use crate::error::{LaunchError, SupervisorError};
use crate::pool::{failover_order, promote, NetworkProbe, PoolProbe, DEFAULT_PROBE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

pub use log_buffer::{LogBuffer, LOG_CAPACITY};

/// 单行输出的最大字节数
pub const MAX_LINE_BYTES: usize = 64 * 1024;
pub use terminate::{ProcessTerminator, SystemTerminator};

/// 监管器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    /// 无子进程
    Idle,
    /// 正在启动
    Starting,
    /// 运行中
    Running,
    /// 正在停止
    Stopping,
}

/// 单行输出事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// "stdout" 或 "stderr"
    pub source: String,
    pub line: String,
    /// HH:MM:SS
    pub time: String,
}

impl LogEvent {
    pub fn new(source: &str, line: String) -> Self {
        Self {
            source: source.to_string(),
            line,
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

/// 对外广播的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum SupervisorEvent {
    #[serde(rename = "miner:log")]
    Log(LogEvent),
    #[serde(rename = "miner:stopped")]
    Stopped,
}

/// 会话状态的只读副本
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SupervisorState,
    pub start_time: Option<SystemTime>,
    pub pid: Option<u32>,
    pub pool_connected: bool,
}

impl SessionSnapshot {
    pub fn running(&self) -> bool {
        self.state == SupervisorState::Running
    }

    pub fn uptime(&self) -> Duration {
        self.start_time
            .and_then(|start| SystemTime::now().duration_since(start).ok())
            .unwrap_or(Duration::from_secs(0))
    }
}

struct SessionState {
    state: SupervisorState,
    /// 会话代数，旧会话的任务据此忽略自身的更新
    generation: u64,
    start_time: Option<SystemTime>,
    pid: Option<u32>,
    logs: LogBuffer,
    pool_connected: bool,
    kill_sender: Option<oneshot::Sender<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            state: SupervisorState::Idle,
            generation: 0,
            start_time: None,
            pid: None,
            logs: LogBuffer::default(),
            pool_connected: false,
            kill_sender: None,
        }
    }
}

/// 挖矿进程监管器
pub struct ProcessSupervisor {
    /// 配置存储
    config_store: ConfigStore,
    /// 挖矿程序来源
    binary: MinerBinary,
    /// 矿池探测器
    probe: Arc<dyn PoolProbe>,
    /// 进程终止原语
    terminator: Arc<dyn ProcessTerminator>,
    /// 单个矿池的探测超时
    probe_timeout: Duration,
    /// 会话状态
    state: Arc<RwLock<SessionState>>,
    /// 串行化 start/stop
    lifecycle_gate: Mutex<()>,
    /// 事件广播
    event_sender: broadcast::Sender<SupervisorEvent>,
}

impl ProcessSupervisor {
    pub fn new(config_store: ConfigStore, binary: MinerBinary) -> Self {
        let (event_sender, _) = broadcast::channel(1000);
        Self {
            config_store,
            binary,
            probe: Arc::new(NetworkProbe::new()),
            terminator: Arc::new(SystemTerminator::new()),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            state: Arc::new(RwLock::new(SessionState::new())),
            lifecycle_gate: Mutex::new(()),
            event_sender,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn PoolProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn ProcessTerminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn binary(&self) -> &MinerBinary {
        &self.binary
    }

    pub fn probe(&self) -> Arc<dyn PoolProbe> {
        self.probe.clone()
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// 订阅日志与停止事件
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_sender.subscribe()
    }

    /// 启动挖矿程序
    ///
    /// 成功返回时进程已创建，不等待其进入稳定状态。任何失败都会回到空闲状态。
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let _gate = self.lifecycle_gate.lock().await;

        {
            let mut state = self.state.write().await;
            if state.state == SupervisorState::Running {
                warn!("Miner is already running");
                return Err(SupervisorError::AlreadyRunning);
            }
            state.state = SupervisorState::Starting;
        }

        match self.launch().await {
            Ok(pid) => {
                info!("✅ Miner started (pid {:?})", pid);
                Ok(())
            }
            Err(e) => {
                self.state.write().await.state = SupervisorState::Idle;
                error!("❌ Failed to start miner: {}", e);
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<Option<u32>, SupervisorError> {
        let exe_path = self.binary.resolve()?;

        let mut config = self.config_store.load()?;
        if let Some(index) =
            failover_order(&config.pools, self.probe.as_ref(), self.probe_timeout).await?
        {
            self.config_store.promote_pool(index)?;
            config.pools = promote(&config.pools, index);
        }

        let config_path = absolute_path(&self.config_store.config_path());
        info!(
            "🚀 Launching {} with pool {}",
            exe_path.display(),
            config.pools.first().map(|p| p.url.as_str()).unwrap_or("-")
        );

        let mut command = Command::new(&exe_path);
        command
            .arg("--config")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = exe_path.parent() {
            command.current_dir(dir);
        }
        #[cfg(windows)]
        command.creation_flags(terminate::CREATE_NO_WINDOW);
        // 独立进程组，停止时整组结束
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| LaunchError::Spawn {
            path: exe_path.display().to_string(),
            error: e.to_string(),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = child.id();
        let (kill_sender, kill_receiver) = oneshot::channel();

        let generation = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.state = SupervisorState::Running;
            state.start_time = Some(SystemTime::now());
            state.pid = pid;
            state.logs = LogBuffer::default();
            state.pool_connected = false;
            state.kill_sender = Some(kill_sender);
            state.generation
        };

        if let Some(stdout) = stdout {
            tokio::spawn(capture_output(
                stdout,
                "stdout",
                self.state.clone(),
                self.event_sender.clone(),
                generation,
            ));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(capture_output(
                stderr,
                "stderr",
                self.state.clone(),
                self.event_sender.clone(),
                generation,
            ));
        }
        tokio::spawn(monitor_process(
            child,
            kill_receiver,
            self.state.clone(),
            self.event_sender.clone(),
            generation,
        ));

        Ok(pid)
    }

    /// 停止挖矿程序（尽力而为，从不失败）
    ///
    /// 先按PID终止进程树并通知监控任务直接结束子进程，
    /// 再按映像名清理所有残留实例。不会等待进程真正退出。
    pub async fn stop(&self) {
        let _gate = self.lifecycle_gate.lock().await;

        let (pid, kill_sender) = {
            let mut state = self.state.write().await;
            if state.state == SupervisorState::Running {
                state.state = SupervisorState::Stopping;
            }
            (state.pid.take(), state.kill_sender.take())
        };

        if let Some(pid) = pid {
            info!("🛑 Stopping miner (pid {})", pid);
            self.terminator.kill_tree(pid).await;
        }
        if let Some(kill_sender) = kill_sender {
            if kill_sender.send(()).is_err() {
                debug!("Monitor task already finished");
            }
        }

        self.terminator.kill_by_name(&self.binary.image_name()).await;

        self.state.write().await.state = SupervisorState::Idle;
        info!("Miner stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.state == SupervisorState::Running
    }

    pub async fn state(&self) -> SupervisorState {
        self.state.read().await.state
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            state: state.state,
            start_time: state.start_time,
            pid: state.pid,
            pool_connected: state.pool_connected,
        }
    }

    /// 当前会话的日志副本
    pub async fn logs(&self) -> Vec<String> {
        self.state.read().await.logs.lines()
    }

    pub async fn clear_logs(&self) {
        self.state.write().await.logs.clear();
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// 逐行读取输出流直到关闭
async fn capture_output<R>(
    reader: R,
    source: &'static str,
    state: Arc<RwLock<SessionState>>,
    event_sender: broadcast::Sender<SupervisorEvent>,
    generation: u64,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        // 超长的行按上限切分成多行
        match (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await
        {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                record_line(&state, &event_sender, generation, source, line).await;
            }
            Err(e) => {
                debug!("{} reader closed: {}", source, e);
                break;
            }
        }
    }
    debug!("{} stream closed", source);
}

async fn record_line(
    state: &RwLock<SessionState>,
    event_sender: &broadcast::Sender<SupervisorEvent>,
    generation: u64,
    source: &str,
    line: String,
) {
    let verdict = connectivity::classify(&line);
    {
        let mut state = state.write().await;
        if state.generation != generation {
            return;
        }
        state.logs.push(line.clone());
        if let Some(connected) = verdict {
            state.pool_connected = connected;
        }
    }

    // 没有订阅者时发送失败是正常的
    let _ = event_sender.send(SupervisorEvent::Log(LogEvent::new(source, line)));
}

/// 等待子进程退出，收到停止信号时直接结束子进程
async fn monitor_process(
    mut child: Child,
    kill_receiver: oneshot::Receiver<()>,
    state: Arc<RwLock<SessionState>>,
    event_sender: broadcast::Sender<SupervisorEvent>,
    generation: u64,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_receiver => {
            if let Err(e) = child.start_kill() {
                debug!("Direct kill failed: {}", e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => info!("Miner process exited: {}", status),
        Err(e) => warn!("Failed to wait for miner process: {}", e),
    }

    {
        let mut state = state.write().await;
        if state.generation == generation {
            state.state = SupervisorState::Idle;
            state.pid = None;
            state.kill_sender = None;
        }
    }

    let _ = event_sender.send(SupervisorEvent::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_state() -> (Arc<RwLock<SessionState>>, broadcast::Sender<SupervisorEvent>) {
        let mut state = SessionState::new();
        state.state = SupervisorState::Running;
        state.generation = 1;
        let (sender, _) = broadcast::channel(16);
        (Arc::new(RwLock::new(state)), sender)
    }

    #[tokio::test]
    async fn test_capture_applies_heuristic_in_order() {
        let (state, sender) = running_state();
        let mut events = sender.subscribe();

        let reader = tokio_test::io::Builder::new()
            .read(b"new job received\r\n")
            .read(b"pool timeout\n")
            .build();
        capture_output(reader, "stdout", state.clone(), sender.clone(), 1).await;

        {
            let state = state.read().await;
            assert_eq!(state.logs.lines(), vec!["new job received", "pool timeout"]);
            assert!(!state.pool_connected);
        }

        let reader = tokio_test::io::Builder::new()
            .read(b"pool timeout\nnew job received")
            .build();
        capture_output(reader, "stderr", state.clone(), sender.clone(), 1).await;
        assert!(state.read().await.pool_connected);

        match events.recv().await.unwrap() {
            SupervisorEvent::Log(event) => {
                assert_eq!(event.source, "stdout");
                assert_eq!(event.line, "new job received");
                assert_eq!(event.time.len(), 8);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let (state, sender) = running_state();
        let reader = tokio_test::io::Builder::new().read(b"new job received\n").build();
        capture_output(reader, "stdout", state.clone(), sender, 0).await;

        let state = state.read().await;
        assert!(state.logs.is_empty());
        assert!(!state.pool_connected);
    }

    #[tokio::test]
    async fn test_overlong_line_is_split() {
        let (state, sender) = running_state();
        let mut data = vec![b'a'; MAX_LINE_BYTES + 100];
        data.extend_from_slice(b"\nok\n");
        let reader = tokio_test::io::Builder::new().read(&data).build();
        capture_output(reader, "stdout", state.clone(), sender, 1).await;

        let logs = state.read().await.logs.lines();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].len(), MAX_LINE_BYTES);
        assert_eq!(logs[1], "a".repeat(100));
        assert_eq!(logs[2], "ok");
    }

    #[tokio::test]
    async fn test_capture_keeps_last_500_lines() {
        let (state, sender) = running_state();
        let data: String = (0..=LOG_CAPACITY).map(|i| format!("line {}\n", i)).collect();
        let reader = tokio_test::io::Builder::new().read(data.as_bytes()).build();
        capture_output(reader, "stdout", state.clone(), sender, 1).await;

        let logs = state.read().await.logs.lines();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert_eq!(logs[0], "line 1");
        assert_eq!(logs[LOG_CAPACITY - 1], "line 500");
    }

    #[test]
    fn test_event_serialization() {
        let event = SupervisorEvent::Log(LogEvent {
            source: "stdout".into(),
            line: "hello".into(),
            time: "12:00:00".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "miner:log");
        assert_eq!(value["payload"]["source"], "stdout");

        let value = serde_json::to_value(&SupervisorEvent::Stopped).unwrap();
        assert_eq!(value["event"], "miner:stopped");
    }

    #[test]
    fn test_snapshot_uptime() {
        let snapshot = SessionSnapshot {
            state: SupervisorState::Idle,
            start_time: None,
            pid: None,
            pool_connected: false,
        };
        assert!(!snapshot.running());
        assert_eq!(snapshot.uptime(), Duration::from_secs(0));
    }
}
