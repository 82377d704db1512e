use thiserror::Error;
use uuid::Uuid;

use crate::models::ExecutionStatus;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务定义校验失败: {0}")]
    Validation(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("执行记录未找到: {id}")]
    ExecutionNotFound { id: Uuid },

    #[error("任务 {task_id} 已有正在运行的实例")]
    AlreadyRunning { task_id: Uuid },

    #[error("无法启动进程: {0}")]
    Launch(String),

    #[error("任务执行超时 ({seconds} 秒)")]
    ExecutionTimeout { seconds: u64 },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("非法的执行状态转换: {from} -> {to}")]
    InvalidStateTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("通知发送失败: {0}")]
    Notification(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否属于调用方输入导致的校验错误
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::Validation(_) | SchedulerError::InvalidCron { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchedulerError::TaskNotFound { .. } | SchedulerError::ExecutionNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
