use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schedule::Schedule;
use crate::{Result, SchedulerError};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 3_600;
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;
pub const MAX_NAME_LENGTH: usize = 255;

/// 任务定义
///
/// 表示系统中可调度执行的任务单元。`next_run_at` 是由调度规则推导出的缓存字段，
/// 在创建、更新、启用以及每次调度触发后重新计算。
///
/// # 使用示例
///
/// ```rust
/// use scheduler_core::models::{Schedule, Task, TaskDefinition};
/// use chrono::Utc;
///
/// let definition = TaskDefinition::new("数据备份", "backup.sh", Schedule::cron("0 2 * * *"));
/// let task = Task::from_definition(definition, Utc::now());
/// assert!(task.enabled);
/// assert!(task.next_run_at.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub command: String,
    pub schedule: Schedule,
    pub enabled: bool,
    pub timeout_seconds: u64,
    pub notify_on_success: bool,
    pub notify_on_failure: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建或更新任务时由调用方提供的定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub command: String,
    pub schedule: Schedule,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub notify_on_success: bool,
    #[serde(default = "default_true")]
    pub notify_on_failure: bool,
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, command: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            description: None,
            command: command.into(),
            schedule,
            enabled: true,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            notify_on_success: false,
            notify_on_failure: true,
        }
    }

    /// 校验与调度规则无关的字段
    pub fn validate_fields(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(SchedulerError::Validation("任务名称不能为空".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(SchedulerError::Validation(format!(
                "任务名称长度不能超过 {MAX_NAME_LENGTH} 个字符"
            )));
        }
        if self.command.trim().is_empty() {
            return Err(SchedulerError::Validation("执行命令不能为空".to_string()));
        }
        if self.timeout_seconds == 0 || self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(SchedulerError::Validation(format!(
                "超时时间必须在 1 到 {MAX_TIMEOUT_SECONDS} 秒之间，当前为 {}",
                self.timeout_seconds
            )));
        }
        Ok(())
    }
}

impl Task {
    /// 由定义创建新任务，`next_run_at` 由注册表计算
    pub fn from_definition(definition: TaskDefinition, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: definition.name.trim().to_string(),
            description: definition.description,
            command: definition.command,
            schedule: definition.schedule,
            enabled: definition.enabled,
            timeout_seconds: definition.timeout_seconds,
            notify_on_success: definition.notify_on_success,
            notify_on_failure: definition.notify_on_failure,
            next_run_at: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 用新定义覆盖可编辑字段，保留ID、创建时间和上次执行时间
    pub fn apply_definition(&mut self, definition: TaskDefinition, now: DateTime<Utc>) {
        if self.schedule != definition.schedule {
            // 换了调度规则，旧的执行时间不再作为间隔起点
            self.last_run_at = None;
        }
        self.name = definition.name.trim().to_string();
        self.description = definition.description;
        self.command = definition.command;
        self.schedule = definition.schedule;
        self.enabled = definition.enabled;
        self.timeout_seconds = definition.timeout_seconds;
        self.notify_on_success = definition.notify_on_success;
        self.notify_on_failure = definition.notify_on_failure;
        self.updated_at = now;
    }

    pub fn definition(&self) -> TaskDefinition {
        TaskDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            command: self.command.clone(),
            schedule: self.schedule.clone(),
            enabled: self.enabled,
            timeout_seconds: self.timeout_seconds,
            notify_on_success: self.notify_on_success,
            notify_on_failure: self.notify_on_failure,
        }
    }

    /// 已启用且到达触发时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|next| next <= now)
    }
}
