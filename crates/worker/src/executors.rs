use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scheduler_core::config::ExecutorConfig;
use scheduler_core::models::{ExecutionRequest, ExecutionResult, ExecutionStatus};
use scheduler_core::traits::TaskExecutor;
use scheduler_core::SchedulerError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// shell 找不到命令时的退出码
const EXIT_COMMAND_NOT_FOUND: i32 = 127;
/// shell 找到文件但无法执行时的退出码
const EXIT_NOT_EXECUTABLE: i32 = 126;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shell任务执行器
///
/// 每次执行都通过 `<shell> <shell_arg> <command>` 启动独立的进程组，
/// 超时后先向整个进程组发送 SIGTERM，宽限期过后再发送 SIGKILL。
/// 执行器本身不保存任何运行状态，可以被多个执行并发调用。
pub struct ShellExecutor {
    config: ExecutorConfig,
}

impl ShellExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg(&self.config.shell_arg)
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        // 新进程组，超时时可以终止整个子进程树
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// 等待进程结束，超时则终止整个进程组
    async fn wait_with_timeout(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        limit: Duration,
    ) -> WaitOutcome {
        match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => WaitOutcome::Exited(status),
            Ok(Err(e)) => WaitOutcome::WaitFailed(e.to_string()),
            Err(_) => {
                signal_process_group(child, pid, Signal::Terminate);
                let grace = self.config.kill_grace_period();
                let deadline = Instant::now() + grace;
                let leader_exited = timeout(grace, child.wait()).await.is_ok();

                // 组长退出后，忽略SIGTERM的组内进程仍可能存活
                while leader_exited && process_group_alive(pid) && Instant::now() < deadline {
                    sleep(GROUP_POLL_INTERVAL).await;
                }

                if !leader_exited || process_group_alive(pid) {
                    warn!("进程组在 {:?} 内未退出，发送SIGKILL", grace);
                    signal_process_group(child, pid, Signal::Kill);
                    if !leader_exited {
                        let _ = child.wait().await;
                    }
                }
                WaitOutcome::TimedOut
            }
        }
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    WaitFailed(String),
}

#[derive(Clone, Copy, Debug)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_process_group(child: &mut Child, pid: Option<u32>, signal: Signal) {
    let Some(pid) = pid else {
        let _ = child.start_kill();
        return;
    };
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // 子进程以 process_group(0) 启动，进程组ID等于其PID
    let ret = unsafe { libc::killpg(pid as libc::pid_t, signo) };
    if ret != 0 {
        debug!(
            "向进程组 {} 发送 {:?} 失败: {}",
            pid,
            signal,
            std::io::Error::last_os_error()
        );
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn signal_process_group(child: &mut Child, _pid: Option<u32>, _signal: Signal) {
    let _ = child.start_kill();
}

/// 进程组中是否还有进程（包括尚未被回收的僵尸进程）
#[cfg(unix)]
fn process_group_alive(pid: Option<u32>) -> bool {
    match pid {
        Some(pid) => unsafe { libc::killpg(pid as libc::pid_t, 0) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn process_group_alive(_pid: Option<u32>) -> bool {
    false
}

/// 单路输出的捕获缓冲
#[derive(Debug, Default)]
struct CapturedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CapturedOutput {
    fn into_text(self, cap: usize) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(&format!("\n[输出已截断，仅保留前 {cap} 字节]"));
        }
        text
    }
}

struct OutputReader {
    handle: JoinHandle<()>,
    buffer: Arc<Mutex<CapturedOutput>>,
}

impl OutputReader {
    /// 持续读取直到EOF，超过上限的部分读出后丢弃，避免子进程因管道写满而阻塞
    fn spawn<R>(mut reader: R, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(CapturedOutput::default()));
        let sink = buffer.clone();
        let handle = tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut captured = sink.lock().unwrap_or_else(|e| e.into_inner());
                let room = cap.saturating_sub(captured.bytes.len());
                let keep = room.min(n);
                captured.bytes.extend_from_slice(&chunk[..keep]);
                if keep < n {
                    captured.truncated = true;
                }
            }
        });
        Self { handle, buffer }
    }

    /// 等待读取结束，超过 `drain` 后放弃并返回已读到的内容
    async fn finish(self, drain: Duration, cap: usize) -> String {
        let OutputReader { mut handle, buffer } = self;
        if timeout(drain, &mut handle).await.is_err() {
            debug!("输出管道在 {:?} 内未关闭，停止读取", drain);
            handle.abort();
        }
        let captured = std::mem::take(&mut *buffer.lock().unwrap_or_else(|e| e.into_inner()));
        captured.into_text(cap)
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// 由退出状态得到执行终态
fn classify_exit(status: &ExitStatus, stderr: &str) -> (ExecutionStatus, Option<i32>, Option<String>) {
    match status.code() {
        Some(0) => (ExecutionStatus::Success, Some(0), None),
        Some(code @ (EXIT_COMMAND_NOT_FOUND | EXIT_NOT_EXECUTABLE)) => {
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| format!("shell 退出码 {code}"));
            (
                ExecutionStatus::Error,
                Some(code),
                Some(SchedulerError::Launch(reason).to_string()),
            )
        }
        Some(code) => (ExecutionStatus::Failed, Some(code), None),
        None => {
            let message = match terminating_signal(status) {
                Some(signal) => format!("进程被信号 {signal} 终止"),
                None => "进程异常退出".to_string(),
            };
            (ExecutionStatus::Failed, None, Some(message))
        }
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let start_time = Instant::now();
        let cap = self.config.max_output_bytes;

        info!(
            "执行Shell任务: execution_id={}, task_id={}, command={}",
            request.execution_id, request.task_id, request.command
        );

        let mut child = match self.build_command(request).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    "启动Shell命令失败: execution_id={}, error={}",
                    request.execution_id, e
                );
                let mut result =
                    ExecutionResult::launch_error(SchedulerError::Launch(e.to_string()).to_string());
                result.duration_ms = start_time.elapsed().as_millis() as u64;
                return result;
            }
        };

        let pid = child.id();
        let stdout_reader = child.stdout.take().map(|out| OutputReader::spawn(out, cap));
        let stderr_reader = child.stderr.take().map(|err| OutputReader::spawn(err, cap));

        let outcome = self.wait_with_timeout(&mut child, pid, request.timeout).await;

        let drain = self.config.output_drain_timeout();
        let stdout = match stdout_reader {
            Some(reader) => reader.finish(drain, cap).await,
            None => String::new(),
        };
        let stderr = match stderr_reader {
            Some(reader) => reader.finish(drain, cap).await,
            None => String::new(),
        };

        let (status, exit_code, error_message) = match outcome {
            WaitOutcome::Exited(exit_status) => classify_exit(&exit_status, &stderr),
            WaitOutcome::TimedOut => (
                ExecutionStatus::Timeout,
                None,
                Some(
                    SchedulerError::ExecutionTimeout {
                        seconds: request.timeout.as_secs(),
                    }
                    .to_string(),
                ),
            ),
            WaitOutcome::WaitFailed(reason) => (
                ExecutionStatus::Error,
                None,
                Some(SchedulerError::TaskExecution(format!("等待进程结束失败: {reason}")).to_string()),
            ),
        };

        let result = ExecutionResult {
            status,
            exit_code,
            stdout,
            stderr,
            error_message,
            duration_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Shell任务执行完成: execution_id={}, status={}, exit_code={:?}, duration={}ms",
            request.execution_id, result.status, result.exit_code, result.duration_ms
        );

        result
    }

    fn name(&self) -> &str {
        "shell"
    }
}
