//! 调度引擎核心：领域模型、错误类型、配置以及各层之间的接口

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::{AppConfig, ConfigValidator};
pub use errors::*;
pub use traits::{ExecutionHistoryStore, Notifier, TaskExecutor, TaskStore};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
