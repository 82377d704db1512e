//! 核心抽象接口
//!
//! - [`TaskStore`] / [`ExecutionHistoryStore`]: 持久化协作方
//! - [`TaskExecutor`]: 执行器
//! - [`Notifier`]: 通知投递

pub mod notifier;
pub mod repository;
pub mod task_executor;

pub use notifier::Notifier;
pub use repository::{ExecutionHistoryStore, TaskStore};
pub use task_executor::TaskExecutor;
