use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use scheduler_core::models::{Schedule, Task};
use scheduler_core::traits::TaskStore;
use scheduler_core::{SchedulerError, SchedulerResult};

use crate::evaluator::ScheduleEvaluator;

/// 任务注册表
///
/// 以任务存储为权威来源，在内存中缓存全部任务供调度循环查询到期任务。
/// 缓存中的 `next_run_at` 直接取自存储，只在创建、更新、启用以及调度触发后重新计算。
/// 同一任务的修改通过各自的异步锁串行化。
pub struct TaskRegistry {
    store: Arc<dyn TaskStore>,
    cache: RwLock<HashMap<Uuid, Task>>,
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    /// 本进程内尚未触发过的startup任务
    startup_pending: Mutex<HashSet<Uuid>>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            startup_pending: Mutex::new(HashSet::new()),
        }
    }

    fn task_lock(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    fn is_startup_pending(&self, id: Uuid) -> bool {
        self.startup_pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// 按任务当前状态计算 `next_run_at`
    fn compute_next_run(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        if !task.enabled {
            return Ok(None);
        }
        let last_run = match task.schedule {
            // startup 只认本进程内的状态，与持久化的 last_run_at 无关
            Schedule::Startup {} if self.is_startup_pending(task.id) => None,
            Schedule::Startup {} => Some(task.last_run_at.unwrap_or(now)),
            _ => task.last_run_at,
        };
        ScheduleEvaluator::next_fire(&task.schedule, now, last_run)
    }

    async fn persist(&self, task: &Task) -> SchedulerResult<()> {
        self.store.save(task).await?;
        self.cache.write().await.insert(task.id, task.clone());
        Ok(())
    }

    /// 从任务存储重新加载全部任务
    ///
    /// 失败时保留原有缓存，由调用方决定如何处理。
    pub async fn refresh(&self) -> SchedulerResult<usize> {
        let tasks = self.store.load_all().await?;
        let count = tasks.len();
        let mut cache = self.cache.write().await;
        *cache = tasks.into_iter().map(|task| (task.id, task)).collect();
        debug!("任务注册表已刷新，共 {} 个任务", count);
        Ok(count)
    }

    /// 已启用且 `next_run_at <= now` 的任务，按触发时间排序
    pub async fn list_due(&self, now: DateTime<Utc>) -> Vec<Task> {
        let cache = self.cache.read().await;
        let mut due: Vec<Task> = cache.values().filter(|t| t.is_due(now)).cloned().collect();
        due.sort_by_key(|t| (t.next_run_at, t.created_at));
        due
    }

    /// 计算 `next_run_at` 并保存任务（新建或整体覆盖）
    pub async fn upsert(&self, mut task: Task, now: DateTime<Utc>) -> SchedulerResult<Task> {
        let lock = self.task_lock(task.id);
        let _guard = lock.lock().await;

        task.next_run_at = self.compute_next_run(&task, now)?;
        self.persist(&task).await?;
        Ok(task)
    }

    /// 在任务锁内读取最新任务、应用修改并重新计算 `next_run_at`
    pub async fn modify<F>(&self, id: Uuid, now: DateTime<Utc>, apply: F) -> SchedulerResult<Task>
    where
        F: FnOnce(&mut Task) -> SchedulerResult<()>,
    {
        let lock = self.task_lock(id);
        let _guard = lock.lock().await;

        let mut task = self
            .store
            .load(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })?;
        apply(&mut task)?;
        task.next_run_at = self.compute_next_run(&task, now)?;
        self.persist(&task).await?;
        Ok(task)
    }

    /// 删除任务，返回任务是否存在
    pub async fn remove(&self, id: Uuid) -> SchedulerResult<bool> {
        let lock = self.task_lock(id);
        let existed = {
            let _guard = lock.lock().await;
            let existed = self.store.delete(id).await?;
            self.cache.write().await.remove(&id);
            self.startup_pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            existed
        };
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(existed)
    }

    /// 记录一次调度触发
    ///
    /// 更新 `last_run_at` 并重新计算 `next_run_at`；一次性任务触发后被禁用。
    /// 任务在此期间已被删除时返回 `None`。
    pub async fn mark_ran(&self, id: Uuid, ran_at: DateTime<Utc>) -> SchedulerResult<Option<Task>> {
        let lock = self.task_lock(id);
        let _guard = lock.lock().await;

        let Some(mut task) = self.store.load(id).await? else {
            debug!("任务 {} 已被删除，忽略执行记录", id);
            return Ok(None);
        };

        self.startup_pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        task.last_run_at = Some(ran_at);
        if matches!(task.schedule, Schedule::Once { .. }) {
            task.enabled = false;
            info!("一次性任务 {} 已触发，自动禁用", task.name);
        }
        task.next_run_at = self.compute_next_run(&task, ran_at)?;
        self.persist(&task).await?;
        Ok(Some(task))
    }

    /// 把所有已启用的startup任务标记为本进程待触发，`next_run_at` 设为 `now`
    pub async fn prime_startup_tasks(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let startup_ids: Vec<Uuid> = self
            .cache
            .read()
            .await
            .values()
            .filter(|t| t.enabled && matches!(t.schedule, Schedule::Startup {}))
            .map(|t| t.id)
            .collect();

        let mut primed = 0;
        for id in startup_ids {
            self.startup_pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id);
            let lock = self.task_lock(id);
            let _guard = lock.lock().await;
            let Some(mut task) = self.store.load(id).await? else {
                continue;
            };
            task.next_run_at = self.compute_next_run(&task, now)?;
            self.persist(&task).await?;
            primed += 1;
        }
        if primed > 0 {
            info!("{} 个startup任务将在本次启动时执行", primed);
        }
        Ok(primed)
    }

    /// 从任务存储读取单个任务
    pub async fn get(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        self.store.load(id).await
    }

    /// 从任务存储读取全部任务
    pub async fn list(&self) -> SchedulerResult<Vec<Task>> {
        self.store.load_all().await
    }

    /// 缓存中的任务数量
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use scheduler_core::models::TaskDefinition;
    use scheduler_infrastructure::InMemoryTaskStore;

    fn registry() -> (TaskRegistry, Arc<InMemoryTaskStore>) {
        let store = Arc::new(InMemoryTaskStore::new());
        (TaskRegistry::new(store.clone()), store)
    }

    fn task(schedule: Schedule, now: DateTime<Utc>) -> Task {
        Task::from_definition(TaskDefinition::new("t", "true", schedule), now)
    }

    #[tokio::test]
    async fn test_upsert_computes_next_run() {
        let (registry, store) = registry();
        let now = Utc::now();

        let saved = registry
            .upsert(task(Schedule::every_seconds(60), now), now)
            .await
            .unwrap();
        assert_eq!(saved.next_run_at, Some(now));
        assert_eq!(store.load(saved.id).await.unwrap().unwrap().next_run_at, Some(now));

        let mut disabled = task(Schedule::every_seconds(60), now);
        disabled.enabled = false;
        let saved = registry.upsert(disabled, now).await.unwrap();
        assert!(saved.next_run_at.is_none());
    }

    #[tokio::test]
    async fn test_list_due_uses_cached_next_run() {
        let (registry, _) = registry();
        let now = Utc::now();
        let due = registry
            .upsert(task(Schedule::every_seconds(60), now), now)
            .await
            .unwrap();
        registry
            .upsert(task(Schedule::once(now + Duration::hours(1)), now), now)
            .await
            .unwrap();

        let listed = registry.list_due(now).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
    }

    #[tokio::test]
    async fn test_mark_ran_advances_interval() {
        let (registry, _) = registry();
        let now = Utc::now();
        let saved = registry
            .upsert(task(Schedule::every_seconds(60), now), now)
            .await
            .unwrap();

        let ran = registry.mark_ran(saved.id, now).await.unwrap().unwrap();
        assert_eq!(ran.last_run_at, Some(now));
        assert_eq!(ran.next_run_at, Some(now + Duration::seconds(60)));
        assert!(registry.list_due(now).await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_ran_disables_once_task() {
        let (registry, _) = registry();
        let now = Utc::now();
        let run_date = now + Duration::seconds(1);
        let saved = registry
            .upsert(task(Schedule::once(run_date), now), now)
            .await
            .unwrap();
        assert_eq!(saved.next_run_at, Some(run_date));

        let ran = registry.mark_ran(saved.id, run_date).await.unwrap().unwrap();
        assert!(!ran.enabled);
        assert!(ran.next_run_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_ran_ignores_deleted_task() {
        let (registry, _) = registry();
        let now = Utc::now();
        let saved = registry
            .upsert(task(Schedule::every_seconds(5), now), now)
            .await
            .unwrap();
        assert!(registry.remove(saved.id).await.unwrap());
        assert!(registry.mark_ran(saved.id, now).await.unwrap().is_none());
        assert!(!registry.remove(saved.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_startup_task_fires_once_per_process() {
        let (registry, store) = registry();
        let now = Utc::now();

        let saved = registry
            .upsert(task(Schedule::startup(), now), now)
            .await
            .unwrap();
        // 运行中创建的startup任务要等下次启动
        assert!(saved.next_run_at.is_none());

        // 模拟进程重启
        let restarted = TaskRegistry::new(store.clone());
        restarted.refresh().await.unwrap();
        assert_eq!(restarted.prime_startup_tasks(now).await.unwrap(), 1);
        assert_eq!(restarted.list_due(now).await.len(), 1);

        let ran = restarted.mark_ran(saved.id, now).await.unwrap().unwrap();
        assert!(ran.next_run_at.is_none());
        let later = now + Duration::minutes(5);
        restarted.refresh().await.unwrap();
        assert!(restarted.list_due(later).await.is_empty());
    }

    #[tokio::test]
    async fn test_modify_missing_task() {
        let (registry, _) = registry();
        let err = registry
            .modify(Uuid::new_v4(), Utc::now(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_refresh_picks_up_external_changes() {
        let (registry, store) = registry();
        let now = Utc::now();
        let mut external = task(Schedule::every_seconds(5), now);
        external.next_run_at = Some(now);
        store.save(&external).await.unwrap();

        assert!(registry.list_due(now).await.is_empty());
        assert_eq!(registry.refresh().await.unwrap(), 1);
        assert_eq!(registry.list_due(now).await.len(), 1);
        assert_eq!(registry.cached_len().await, 1);
    }
}
