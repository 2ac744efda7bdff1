//! 操作系统级的进程终止原语，所有命令都静默执行

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Windows 下不创建控制台窗口
#[cfg(windows)]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// 进程终止接口
#[async_trait]
pub trait ProcessTerminator: Send + Sync {
    /// 按PID终止进程树
    async fn kill_tree(&self, pid: u32);

    /// 终止所有映像名匹配的进程
    async fn kill_by_name(&self, image: &str);
}

/// 创建不显示窗口、丢弃输出的命令
pub(crate) fn silent_command(program: &str) -> Command {
    let mut command = Command::new(program);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);
    command
}

/// 使用系统命令终止进程
#[derive(Debug, Clone)]
pub struct SystemTerminator {
    command_timeout: Duration,
}

impl SystemTerminator {
    pub fn new() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
        }
    }

    async fn run_silent(&self, program: &str, args: &[&str]) -> bool {
        let mut command = silent_command(program);
        command.args(args);

        match timeout(self.command_timeout, command.status()).await {
            Ok(Ok(status)) => {
                debug!("{} {:?} exited with {}", program, args, status);
                status.success()
            }
            Ok(Err(e)) => {
                debug!("{} {:?} failed: {}", program, args, e);
                false
            }
            Err(_) => {
                warn!("{} {:?} timed out", program, args);
                false
            }
        }
    }
}

impl Default for SystemTerminator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessTerminator for SystemTerminator {
    async fn kill_tree(&self, pid: u32) {
        let pid_arg = pid.to_string();
        if cfg!(windows) {
            self.run_silent("taskkill", &["/F", "/T", "/PID", &pid_arg]).await;
        } else {
            self.run_silent("pkill", &["-KILL", "-P", &pid_arg]).await;
        }

        // 挖矿程序以自己的PID为进程组启动，整组结束才能覆盖孙进程
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, killpg, Signal};
            use nix::unistd::Pid;

            let target = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(target, Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", pid, e);
            }
            if let Err(e) = kill(target, Signal::SIGKILL) {
                debug!("kill({}) failed: {}", pid, e);
            }
        }
    }

    async fn kill_by_name(&self, image: &str) {
        if cfg!(windows) {
            self.run_silent("taskkill", &["/F", "/IM", image]).await;
        } else {
            self.run_silent("pkill", &["-KILL", "-x", image]).await;
        }
    }
}
