//! 数据仓储层接口定义
//!
//! 此模块定义了调度核心依赖的两个持久化协作方：
//! - 任务存储 (`TaskStore`) - 任务定义的增删改查
//! - 执行历史存储 (`ExecutionHistoryStore`) - 执行记录的追加与更新
//!
//! ## 设计原则
//!
//! ### 接口隔离
//! 调度核心只使用最小化的操作集合，分页、统计等查询能力属于展示层。
//!
//! ### 一致性假设
//! 实现需要保证每次调用返回时写入已经生效：
//! - `save` 返回后 `load` / `load_all` 必须能读到新值
//! - `append` / `update` 返回后记录即视为持久化
//! - 终态执行记录只写入一次
//!
//! ### 线程安全
//! 所有接口都要求 `Send + Sync`，调度循环、执行任务和手动触发会并发调用。

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Execution, Task};
use crate::SchedulerResult;

/// 任务存储接口
///
/// 任务定义的权威来源。任务注册表在每个调度周期重新读取全部任务，
/// 因此外部对存储的修改最多延迟一个周期生效。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 保存任务（不存在则插入，存在则整体覆盖）
    async fn save(&self, task: &Task) -> SchedulerResult<()>;

    /// 根据ID读取任务，不存在时返回 `None`
    async fn load(&self, id: Uuid) -> SchedulerResult<Option<Task>>;

    /// 读取全部任务，按创建时间升序
    async fn load_all(&self) -> SchedulerResult<Vec<Task>>;

    /// 删除任务
    ///
    /// 返回任务是否存在。执行历史不随任务删除。
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool>;
}

/// 执行历史存储接口
///
/// 执行协调器在获取执行槽位时追加 pending 记录，之后随状态变化更新同一条记录。
/// 多个进程共用同一存储时，同一任务最多一个执行中记录由存储保证。
#[async_trait]
pub trait ExecutionHistoryStore: Send + Sync {
    /// 追加新的执行记录
    ///
    /// 记录处于 pending/running 且同一任务已有 pending/running 记录时不写入，返回 `false`。
    /// 检查与写入必须是原子的。
    async fn append(&self, execution: &Execution) -> SchedulerResult<bool>;

    /// 按ID整体更新执行记录
    ///
    /// # 错误
    ///
    /// * `ExecutionNotFound` - 记录不存在
    /// * `InvalidStateTransition` - 已存储的记录处于终态，终态不可覆盖
    async fn update(&self, execution: &Execution) -> SchedulerResult<()>;

    /// 根据ID读取执行记录
    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Execution>>;

    /// 列出执行记录，按开始时间倒序
    ///
    /// `task_id` 为 `None` 时返回所有任务的记录，`limit` 为 `None` 时不限制条数。
    async fn list(
        &self,
        task_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Execution>>;

    /// 列出仍处于 pending/running 的记录
    ///
    /// 用于进程启动时清理上一次运行遗留的执行。
    async fn list_unfinished(&self) -> SchedulerResult<Vec<Execution>>;
}
