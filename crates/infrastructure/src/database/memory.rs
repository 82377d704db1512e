//! 内存存储实现
//!
//! 数据只存在于进程内，用于测试以及 `database.url = "memory"` 的临时运行。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scheduler_core::models::{Execution, Task};
use scheduler_core::traits::{ExecutionHistoryStore, TaskStore};
use scheduler_core::{SchedulerError, SchedulerResult};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 内存任务存储
#[derive(Debug, Default, Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn load_all(&self) -> SchedulerResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        Ok(self.tasks.write().await.remove(&id).is_some())
    }
}

/// 内存执行历史存储，按追加顺序保存
#[derive(Debug, Default, Clone)]
pub struct InMemoryExecutionStore {
    executions: Arc<RwLock<Vec<Execution>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部记录，按追加顺序
    pub async fn all(&self) -> Vec<Execution> {
        self.executions.read().await.clone()
    }
}

#[async_trait]
impl ExecutionHistoryStore for InMemoryExecutionStore {
    async fn append(&self, execution: &Execution) -> SchedulerResult<bool> {
        let mut executions = self.executions.write().await;
        if executions.iter().any(|e| e.id == execution.id) {
            return Err(SchedulerError::DatabaseOperation(format!(
                "执行记录已存在: {}",
                execution.id
            )));
        }
        if execution.status.is_active()
            && executions
                .iter()
                .any(|e| e.task_id == execution.task_id && e.status.is_active())
        {
            return Ok(false);
        }
        executions.push(execution.clone());
        Ok(true)
    }

    async fn update(&self, execution: &Execution) -> SchedulerResult<()> {
        let mut executions = self.executions.write().await;
        let slot = executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or(SchedulerError::ExecutionNotFound { id: execution.id })?;
        if slot.is_finished() {
            return Err(SchedulerError::InvalidStateTransition {
                from: slot.status,
                to: execution.status,
            });
        }
        *slot = execution.clone();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list(
        &self,
        task_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Execution>> {
        let executions = self.executions.read().await;
        // 倒序遍历保证同一时间戳下后追加的排在前面
        let mut matched: Vec<Execution> = executions
            .iter()
            .rev()
            .filter(|e| task_id.map_or(true, |id| e.task_id == id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn list_unfinished(&self) -> SchedulerResult<Vec<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .filter(|e| e.status.is_active())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use scheduler_core::models::{ExecutionStatus, Schedule, TaskDefinition, TriggerKind};

    #[tokio::test]
    async fn test_task_store_crud() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let first = Task::from_definition(
            TaskDefinition::new("first", "true", Schedule::every_seconds(5)),
            now,
        );
        let second = Task::from_definition(
            TaskDefinition::new("second", "true", Schedule::startup()),
            now + Duration::seconds(1),
        );

        store.save(&second).await.unwrap();
        store.save(&first).await.unwrap();
        let names: Vec<String> = store
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);

        let mut updated = first.clone();
        updated.enabled = false;
        store.save(&updated).await.unwrap();
        assert!(!store.load(first.id).await.unwrap().unwrap().enabled);
        assert_eq!(store.len().await, 2);

        assert!(store.delete(first.id).await.unwrap());
        assert!(!store.delete(first.id).await.unwrap());
        assert!(store.load(first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execution_store_ordering_and_limits() {
        let store = InMemoryExecutionStore::new();
        let task_a = Uuid::new_v4();
        let task_b = Uuid::new_v4();
        let base = Utc::now();

        for i in 0..3 {
            let mut execution = Execution::pending(
                task_a,
                TriggerKind::Scheduled,
                base + Duration::seconds(i),
            );
            execution.abandon("stopped", base + Duration::seconds(i)).unwrap();
            assert!(store.append(&execution).await.unwrap());
        }
        let other = Execution::pending(task_b, TriggerKind::Manual, base);
        assert!(store.append(&other).await.unwrap());

        let listed = store.list(Some(task_a), Some(2)).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].started_at > listed[1].started_at);
        assert_eq!(store.list(None, None).await.unwrap().len(), 4);
        assert_eq!(store.list_unfinished().await.unwrap().len(), 1);

        let mut finished = other.clone();
        finished.abandon("stopped", base).unwrap();
        store.update(&finished).await.unwrap();
        assert_eq!(
            store.get(other.id).await.unwrap().unwrap().status,
            ExecutionStatus::Error
        );
        assert!(store.list_unfinished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_rejects_second_active_execution() {
        let store = InMemoryExecutionStore::new();
        let task_id = Uuid::new_v4();
        let first = Execution::pending(task_id, TriggerKind::Scheduled, Utc::now());
        let second = Execution::pending(task_id, TriggerKind::Manual, Utc::now());

        assert!(store.append(&first).await.unwrap());
        assert!(!store.append(&second).await.unwrap());
        assert!(store.get(second.id).await.unwrap().is_none());

        let mut finished = first.clone();
        finished.abandon("stopped", Utc::now()).unwrap();
        store.update(&finished).await.unwrap();
        assert!(store.append(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_keeps_terminal_record() {
        let store = InMemoryExecutionStore::new();
        let mut execution = Execution::pending(Uuid::new_v4(), TriggerKind::Manual, Utc::now());
        store.append(&execution).await.unwrap();

        let mut closed = execution.clone();
        closed.abandon("restarted", Utc::now()).unwrap();
        store.update(&closed).await.unwrap();

        execution.transition(ExecutionStatus::Running, Utc::now()).unwrap();
        let err = store.update(&execution).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidStateTransition { .. }));
        assert_eq!(
            store.get(execution.id).await.unwrap().unwrap().status,
            ExecutionStatus::Error
        );
    }

    #[tokio::test]
    async fn test_update_missing_execution() {
        let store = InMemoryExecutionStore::new();
        let execution = Execution::pending(Uuid::new_v4(), TriggerKind::Manual, Utc::now());
        let err = store.update(&execution).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionNotFound { .. }));
    }
}
