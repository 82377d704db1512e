//! 任务执行器接口定义

use async_trait::async_trait;

use crate::models::{ExecutionRequest, ExecutionResult};

/// 任务执行器
///
/// 执行一次命令并返回带终态的结果。启动失败、超时等执行期错误都体现在
/// [`ExecutionResult::status`] 中，而不是以 `Err` 返回，
/// 这样调用方总能得到一条完整的执行记录。
///
/// 实现必须是无状态、可重入的，不同任务的执行会并发调用同一个实例。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult;

    /// 执行器名称，用于日志
    fn name(&self) -> &str;
}
