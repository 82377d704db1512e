use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, SchedulerError};

/// 执行记录
///
/// 状态流转: `pending → running → {success | failed | timeout | error}`，终态不可再变更。
/// 在执行期间由执行协调器持有，进入终态后交给执行历史存储。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub task_id: Uuid,
    pub trigger: TriggerKind,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Error
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            // 启动失败或关机放弃时可以从pending直接进入终态
            (Pending, Error) => true,
            (Running, Success | Failed | Timeout | Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "timeout" => Ok(ExecutionStatus::Timeout),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(SchedulerError::Serialization(format!(
                "未知的执行状态: {other}"
            ))),
        }
    }
}

/// 触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Scheduled,
    Manual,
    Startup,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
            TriggerKind::Startup => "startup",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(TriggerKind::Scheduled),
            "manual" => Ok(TriggerKind::Manual),
            "startup" => Ok(TriggerKind::Startup),
            other => Err(SchedulerError::Serialization(format!(
                "未知的触发来源: {other}"
            ))),
        }
    }
}

/// 执行器的输入
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub command: String,
    pub timeout: Duration,
}

/// 执行器的输出，总是带有一个终态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// 进程未能启动
    pub fn launch_error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error_message: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

impl Execution {
    /// 获取执行槽位时创建的pending记录
    pub fn pending(task_id: Uuid, trigger: TriggerKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            trigger,
            status: ExecutionStatus::Pending,
            started_at: now,
            completed_at: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            error_message: None,
            duration_ms: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn transition(&mut self, next: ExecutionStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        match next {
            ExecutionStatus::Running => self.started_at = now,
            status if status.is_terminal() => {
                self.completed_at = Some(now);
                if self.duration_ms.is_none() {
                    let elapsed = (now - self.started_at).num_milliseconds().max(0);
                    self.duration_ms = Some(elapsed as u64);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// 写入执行结果并进入对应终态
    pub fn complete(&mut self, result: ExecutionResult, now: DateTime<Utc>) -> Result<()> {
        if self.is_finished() || !result.status.is_terminal() {
            return Err(SchedulerError::InvalidStateTransition {
                from: self.status,
                to: result.status,
            });
        }
        if self.status == ExecutionStatus::Pending && result.status != ExecutionStatus::Error {
            self.transition(ExecutionStatus::Running, self.started_at)?;
        }
        self.duration_ms = Some(result.duration_ms);
        self.transition(result.status, now)?;
        self.exit_code = result.exit_code;
        self.stdout = Some(result.stdout);
        self.stderr = Some(result.stderr);
        self.error_message = result.error_message;
        Ok(())
    }

    /// 以error终态关闭一个未完成的执行（关机放弃、进程重启）
    pub fn abandon(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(ExecutionStatus::Error, now)?;
        self.error_message = Some(reason.into());
        Ok(())
    }
}
