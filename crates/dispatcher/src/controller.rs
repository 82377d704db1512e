use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use scheduler_core::models::{Execution, Task, TaskDefinition};
use scheduler_core::traits::ExecutionHistoryStore;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_infrastructure::StructuredLogger;

use crate::coordinator::ExecutionCoordinator;
use crate::evaluator::ScheduleEvaluator;
use crate::registry::TaskRegistry;

/// 任务管理接口
///
/// CLI等外部调用方通过它管理任务和查询执行历史，所有修改都经过任务注册表。
pub struct TaskService {
    registry: Arc<TaskRegistry>,
    coordinator: Arc<ExecutionCoordinator>,
    history: Arc<dyn ExecutionHistoryStore>,
}

impl TaskService {
    pub fn new(
        registry: Arc<TaskRegistry>,
        coordinator: Arc<ExecutionCoordinator>,
        history: Arc<dyn ExecutionHistoryStore>,
    ) -> Self {
        Self {
            registry,
            coordinator,
            history,
        }
    }

    /// 创建任务
    ///
    /// # 错误
    ///
    /// * `Validation` / `InvalidCron` - 字段或调度规则不合法，一次性任务的时间已过
    pub async fn create_task(&self, definition: TaskDefinition) -> SchedulerResult<Task> {
        let now = Utc::now();
        definition.validate_fields()?;
        ScheduleEvaluator::validate(&definition.schedule, now)?;

        let task = self
            .registry
            .upsert(Task::from_definition(definition, now), now)
            .await?;
        StructuredLogger::log_task_saved(&task, true);
        Ok(task)
    }

    /// 用新定义覆盖任务
    ///
    /// 调度规则未变化时不重新校验，已触发过的一次性任务仍可修改其他字段。
    pub async fn update_task(&self, id: Uuid, definition: TaskDefinition) -> SchedulerResult<Task> {
        let now = Utc::now();
        definition.validate_fields()?;

        let task = self
            .registry
            .modify(id, now, |task| {
                if task.schedule != definition.schedule {
                    ScheduleEvaluator::validate(&definition.schedule, now)?;
                }
                task.apply_definition(definition, now);
                Ok(())
            })
            .await?;
        StructuredLogger::log_task_saved(&task, false);
        Ok(task)
    }

    /// 删除任务，执行历史保留
    pub async fn delete_task(&self, id: Uuid) -> SchedulerResult<()> {
        let task = self.get_task(id).await?;
        if !self.registry.remove(id).await? {
            return Err(SchedulerError::TaskNotFound { id });
        }
        if self.coordinator.is_running(id) {
            info!("任务 {} 已删除，正在进行的执行会继续完成", task.name);
        }
        StructuredLogger::log_task_deleted(id, &task.name);
        Ok(())
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> SchedulerResult<Task> {
        let now = Utc::now();
        let task = self
            .registry
            .modify(id, now, |task| {
                task.enabled = enabled;
                task.updated_at = now;
                Ok(())
            })
            .await?;
        StructuredLogger::log_task_toggled(task.id, &task.name, enabled);
        Ok(task)
    }

    /// 立即执行一次，不改变任务的调度时间
    ///
    /// # 错误
    ///
    /// * `TaskNotFound` - 任务不存在
    /// * `AlreadyRunning` - 任务已有执行中的实例
    pub async fn run_now(&self, id: Uuid) -> SchedulerResult<Uuid> {
        let task = self.get_task(id).await?;
        self.coordinator.run_now(&task).await
    }

    /// 列出任务，按创建时间升序；`enabled_only` 时只返回启用的任务
    pub async fn list_tasks(&self, enabled_only: bool) -> SchedulerResult<Vec<Task>> {
        let mut tasks = self.registry.list().await?;
        if enabled_only {
            tasks.retain(|task| task.enabled);
        }
        Ok(tasks)
    }

    pub async fn get_task(&self, id: Uuid) -> SchedulerResult<Task> {
        self.registry
            .get(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })
    }

    /// 执行历史，按开始时间倒序
    pub async fn list_executions(
        &self,
        task_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Execution>> {
        self.history.list(task_id, limit).await
    }

    pub async fn get_execution(&self, id: Uuid) -> SchedulerResult<Execution> {
        self.history
            .get(id)
            .await?
            .ok_or(SchedulerError::ExecutionNotFound { id })
    }

    /// 预览任务接下来最多 `count` 次触发时间
    ///
    /// 从已保存的 `next_run_at` 开始推算；任务已禁用或不会再触发时返回空列表。
    pub async fn upcoming_runs(
        &self,
        id: Uuid,
        count: usize,
    ) -> SchedulerResult<Vec<DateTime<Utc>>> {
        let task = self.get_task(id).await?;
        let Some(next) = task.next_run_at.filter(|_| task.enabled) else {
            debug!("任务 {} 没有待触发的时间", task.name);
            return Ok(Vec::new());
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut runs = vec![next];
        runs.extend(ScheduleEvaluator::upcoming(&task.schedule, next, count - 1)?);
        Ok(runs)
    }
}
