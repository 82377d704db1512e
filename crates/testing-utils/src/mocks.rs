//! Mock implementations of the executor, notifier and store traits
//!
//! The stores keep everything in memory and can be switched into a failing
//! mode to exercise error paths of the scheduler loop and coordinator.

use async_trait::async_trait;
use scheduler_core::models::{
    Execution, ExecutionRequest, ExecutionResult, NotificationPayload, Task,
};
use scheduler_core::traits::{ExecutionHistoryStore, Notifier, TaskExecutor, TaskStore};
use scheduler_core::{SchedulerError, SchedulerResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::builders::ResultBuilder;

/// Mock executor returning a fixed result after an optional delay
///
/// Tracks how many executions of the same task overlap so tests can assert
/// the one-in-flight-per-task property.
pub struct MockExecutor {
    result: Mutex<ExecutionResult>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<ExecutionRequest>>,
    active: Mutex<HashMap<Uuid, usize>>,
    max_overlap: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::with_result(ResultBuilder::success().build())
    }

    pub fn with_result(result: ExecutionResult) -> Self {
        Self {
            result: Mutex::new(result),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            max_overlap: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Executor that never finishes within a test
    pub fn hanging() -> Self {
        Self::new().with_delay(Duration::from_secs(3600))
    }

    pub fn set_result(&self, result: ExecutionResult) {
        *self.result.lock().unwrap() = result;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Largest number of simultaneous executions seen for a single task
    pub fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(request.task_id).or_default();
            *count += 1;
            self.max_overlap.fetch_max(*count, Ordering::SeqCst);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(count) = self.active.lock().unwrap().get_mut(&request.task_id) {
            *count -= 1;
        }
        let mut result = self.result.lock().unwrap().clone();
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Notifier recording every payload it receives
#[derive(Default)]
pub struct RecordingNotifier {
    payloads: Mutex<Vec<NotificationPayload>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier that records the payload and then reports a delivery failure
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn payloads(&self) -> Vec<NotificationPayload> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> SchedulerResult<()> {
        self.payloads.lock().unwrap().push(payload.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SchedulerError::Notification("mock delivery failure".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn unavailable(operation: &str) -> SchedulerError {
    SchedulerError::DatabaseOperation(format!("mock store unavailable: {operation}"))
}

/// In-memory task store with a switchable failure mode
#[derive(Clone, Default)]
pub struct MockTaskStore {
    tasks: Arc<Mutex<HashMap<Uuid, Task>>>,
    failing: Arc<AtomicBool>,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While failing every operation returns a database error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    fn check(&self, operation: &str) -> SchedulerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable(operation));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn save(&self, task: &Task) -> SchedulerResult<()> {
        self.check("save")?;
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        self.check("load")?;
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn load_all(&self) -> SchedulerResult<Vec<Task>> {
        self.check("load_all")?;
        let mut tasks: Vec<Task> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        self.check("delete")?;
        Ok(self.tasks.lock().unwrap().remove(&id).is_some())
    }
}

/// In-memory execution history with a switchable append failure
///
/// Enforces the same single-active-execution and terminal-record rules as the real stores.
#[derive(Clone, Default)]
pub struct MockExecutionHistoryStore {
    executions: Arc<Mutex<Vec<Execution>>>,
    fail_append: Arc<AtomicBool>,
}

impl MockExecutionHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_append(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<Execution> {
        self.executions.lock().unwrap().clone()
    }

    pub fn for_task(&self, task_id: Uuid) -> Vec<Execution> {
        self.all()
            .into_iter()
            .filter(|e| e.task_id == task_id)
            .collect()
    }
}

#[async_trait]
impl ExecutionHistoryStore for MockExecutionHistoryStore {
    async fn append(&self, execution: &Execution) -> SchedulerResult<bool> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(unavailable("append"));
        }
        let mut executions = self.executions.lock().unwrap();
        if !execution.is_finished()
            && executions
                .iter()
                .any(|e| e.task_id == execution.task_id && !e.is_finished())
        {
            return Ok(false);
        }
        executions.push(execution.clone());
        Ok(true)
    }

    async fn update(&self, execution: &Execution) -> SchedulerResult<()> {
        let mut executions = self.executions.lock().unwrap();
        let stored = executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or(SchedulerError::ExecutionNotFound { id: execution.id })?;
        if stored.is_finished() {
            return Err(SchedulerError::InvalidStateTransition {
                from: stored.status,
                to: execution.status,
            });
        }
        *stored = execution.clone();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Execution>> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list(
        &self,
        task_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Execution>> {
        let mut executions: Vec<Execution> = self
            .executions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| task_id.map_or(true, |id| e.task_id == id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            executions.truncate(limit);
        }
        Ok(executions)
    }

    async fn list_unfinished(&self) -> SchedulerResult<Vec<Execution>> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.is_finished())
            .cloned()
            .collect())
    }
}
