use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scheduler_core::models::{
    Execution, ExecutionRequest, ExecutionResult, ExecutionStatus, NotificationPayload, Task,
    TriggerKind,
};
use scheduler_core::traits::{ExecutionHistoryStore, Notifier, TaskExecutor};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_infrastructure::{local_hostname, MetricsCollector, StructuredLogger};

const DEFAULT_EXCERPT_CHARS: usize = 500;
const SHUTDOWN_REASON: &str = "调度器关闭时任务仍在运行，执行被放弃";
const RESTART_REASON: &str = "调度器重启，上次运行中的执行被中断";

/// 占用执行槽位的一次执行
struct InFlight {
    execution: Execution,
    abort: Option<AbortHandle>,
}

/// 执行协调器
///
/// 持有 `task_id → 执行中记录` 的映射，保证同一任务同一时刻最多只有一个
/// pending/running 的执行。映射由 `std::sync::Mutex` 保护，临界区内不跨越 await。
pub struct ExecutionCoordinator {
    executor: Arc<dyn TaskExecutor>,
    history: Arc<dyn ExecutionHistoryStore>,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Arc<MetricsCollector>,
    in_flight: Mutex<HashMap<Uuid, InFlight>>,
    /// 每次释放槽位时唤醒 `drain`
    released: Notify,
    excerpt_chars: usize,
    host: String,
}

impl ExecutionCoordinator {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        history: Arc<dyn ExecutionHistoryStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            executor,
            history,
            notifier: None,
            metrics,
            in_flight: Mutex::new(HashMap::new()),
            released: Notify::new(),
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            host: local_hostname(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_flight_count(&self) -> usize {
        self.slots().len()
    }

    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.slots().contains_key(&task_id)
    }

    /// 当前占用槽位的执行快照
    pub fn running_executions(&self) -> Vec<Execution> {
        self.slots().values().map(|slot| slot.execution.clone()).collect()
    }

    /// 尝试为任务获取执行槽位
    ///
    /// 本进程或执行历史中已有执行中的实例时返回 `Ok(None)`。先占用本地槽位，
    /// 再由执行历史原子地追加pending记录，追加失败则释放槽位并返回错误。
    pub async fn try_acquire(
        &self,
        task: &Task,
        trigger: TriggerKind,
    ) -> SchedulerResult<Option<Execution>> {
        let execution = Execution::pending(task.id, trigger, Utc::now());
        let count = {
            let mut slots = self.slots();
            if slots.contains_key(&task.id) {
                drop(slots);
                self.metrics.record_skipped_fire();
                return Ok(None);
            }
            slots.insert(
                task.id,
                InFlight {
                    execution: execution.clone(),
                    abort: None,
                },
            );
            slots.len()
        };
        self.metrics.update_running_executions(count);

        match self.history.append(&execution).await {
            Ok(true) => Ok(Some(execution)),
            Ok(false) => {
                // 其他进程（例如CLI手动触发）正在执行该任务
                debug!("任务 {} 在执行历史中已有执行中的记录，跳过", task.id);
                self.free_slot(task.id, execution.id);
                self.metrics.record_skipped_fire();
                Ok(None)
            }
            Err(e) => {
                error!("写入执行记录失败，释放任务 {} 的执行槽位: {}", task.id, e);
                self.free_slot(task.id, execution.id);
                Err(e)
            }
        }
    }

    /// 在独立的tokio任务中运行已获取槽位的执行
    ///
    /// `task` 是获取槽位时的快照，执行期间任务被删除也能完成记录。
    pub fn dispatch(self: &Arc<Self>, task: Task, execution: Execution) -> JoinHandle<()> {
        let task_id = task.id;
        let execution_id = execution.id;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(task, execution).await });

        if let Some(slot) = self.slots().get_mut(&task_id) {
            if slot.execution.id == execution_id {
                slot.abort = Some(handle.abort_handle());
            }
        }
        handle
    }

    /// 手动触发，不影响任务的调度时间
    pub async fn run_now(self: &Arc<Self>, task: &Task) -> SchedulerResult<Uuid> {
        let execution = self
            .try_acquire(task, TriggerKind::Manual)
            .await?
            .ok_or(SchedulerError::AlreadyRunning { task_id: task.id })?;
        let execution_id = execution.id;
        StructuredLogger::log_task_dispatched(task, TriggerKind::Manual, None);
        self.dispatch(task.clone(), execution);
        Ok(execution_id)
    }

    async fn run(&self, task: Task, mut execution: Execution) {
        match execution.transition(ExecutionStatus::Running, Utc::now()) {
            Ok(()) => {
                if let Some(slot) = self.slots().get_mut(&task.id) {
                    if slot.execution.id == execution.id {
                        slot.execution = execution.clone();
                    }
                }
                if let Err(e) = self.history.update(&execution).await {
                    StructuredLogger::log_system_error("coordinator", "mark_running", &e);
                }
            }
            Err(e) => warn!("执行 {} 无法进入running状态: {}", execution.id, e),
        }
        StructuredLogger::log_execution_start(&execution, &task.name);

        let request = ExecutionRequest {
            execution_id: execution.id,
            task_id: task.id,
            command: task.command.clone(),
            timeout: Duration::from_secs(task.timeout_seconds),
        };
        let result = self.executor.execute(&request).await;
        self.release(&task, execution, result).await;
    }

    /// 写入终态、更新历史、释放槽位，然后记录指标并按需发送通知
    pub async fn release(&self, task: &Task, mut execution: Execution, result: ExecutionResult) {
        if let Err(e) = execution.complete(result, Utc::now()) {
            warn!("执行 {} 无法写入结果: {}", execution.id, e);
            if !execution.is_finished() {
                if let Err(e) = execution.abandon(e.to_string(), Utc::now()) {
                    warn!("执行 {} 无法关闭: {}", execution.id, e);
                }
            }
        }

        match self.history.update(&execution).await {
            Ok(()) => {}
            Err(SchedulerError::InvalidStateTransition { from, .. }) => {
                warn!(
                    "执行 {} 的记录已被关闭为 {}，丢弃本次结果 {}",
                    execution.id, from, execution.status
                );
            }
            Err(e) => StructuredLogger::log_system_error("coordinator", "record_result", &e),
        }
        self.free_slot(task.id, execution.id);

        let duration_seconds = execution.duration_ms.unwrap_or_default() as f64 / 1000.0;
        self.metrics.record_execution(
            execution.status.as_str(),
            execution.trigger.as_str(),
            duration_seconds,
        );
        StructuredLogger::log_execution_complete(&execution, &task.name);

        self.notify(task, &execution).await;
    }

    fn free_slot(&self, task_id: Uuid, execution_id: Uuid) {
        let count = {
            let mut slots = self.slots();
            if slots
                .get(&task_id)
                .is_some_and(|slot| slot.execution.id == execution_id)
            {
                slots.remove(&task_id);
            }
            slots.len()
        };
        self.metrics.update_running_executions(count);
        self.released.notify_waiters();
    }

    async fn notify(&self, task: &Task, execution: &Execution) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let wanted = match execution.status {
            ExecutionStatus::Success => task.notify_on_success,
            _ => task.notify_on_failure,
        };
        if !wanted {
            return;
        }

        let payload =
            NotificationPayload::from_execution(&task.name, execution, self.excerpt_chars, &self.host);
        match notifier.notify(&payload).await {
            Ok(()) => {
                self.metrics.record_notification(notifier.name(), true);
                StructuredLogger::log_notification(notifier.name(), execution.id, Ok(()));
            }
            Err(e) => {
                self.metrics.record_notification(notifier.name(), false);
                StructuredLogger::log_notification(
                    notifier.name(),
                    execution.id,
                    Err(&e.to_string()),
                );
            }
        }
    }

    /// 等待执行中的任务结束，超时后放弃剩余执行并记为error
    ///
    /// 返回被放弃的执行数量。
    pub async fn drain(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let remaining = self.in_flight_count();
            if remaining == 0 {
                return 0;
            }
            debug!("等待 {} 个执行结束", remaining);
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                break;
            }
        }

        let abandoned: Vec<InFlight> = self.slots().drain().map(|(_, slot)| slot).collect();
        self.metrics.update_running_executions(0);
        warn!("关闭超时，放弃 {} 个仍在运行的执行", abandoned.len());

        for slot in &abandoned {
            if let Some(abort) = &slot.abort {
                abort.abort();
            }
            self.abandon(slot.execution.clone(), SHUTDOWN_REASON).await;
        }
        self.released.notify_waiters();
        abandoned.len()
    }

    async fn abandon(&self, mut execution: Execution, reason: &str) {
        // 执行可能恰好在放弃前写入了终态
        if let Ok(Some(stored)) = self.history.get(execution.id).await {
            if stored.is_finished() {
                return;
            }
            execution = stored;
        }
        if let Err(e) = execution.abandon(reason, Utc::now()) {
            warn!("无法关闭执行 {}: {}", execution.id, e);
            return;
        }
        if let Err(e) = self.history.update(&execution).await {
            StructuredLogger::log_system_error("coordinator", "abandon", &e);
            return;
        }
        self.metrics.record_execution(
            execution.status.as_str(),
            execution.trigger.as_str(),
            execution.duration_ms.unwrap_or_default() as f64 / 1000.0,
        );
        StructuredLogger::log_execution_abandoned(execution.id, execution.task_id, reason);
    }

    /// 把上一次进程遗留的pending/running记录关闭为error
    pub async fn recover_interrupted(&self) -> SchedulerResult<usize> {
        let unfinished = self.history.list_unfinished().await?;
        let owned: Vec<Uuid> = self
            .slots()
            .values()
            .map(|slot| slot.execution.id)
            .collect();

        let mut recovered = 0;
        for execution in unfinished {
            if owned.contains(&execution.id) {
                continue;
            }
            self.abandon(execution, RESTART_REASON).await;
            recovered += 1;
        }
        if recovered > 0 {
            info!("已关闭 {} 条上次运行遗留的执行记录", recovered);
        }
        Ok(recovered)
    }
}
