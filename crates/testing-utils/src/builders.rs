//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, Utc};
use scheduler_core::models::{
    Execution, ExecutionResult, ExecutionStatus, Schedule, Task, TaskDefinition, TriggerKind,
};
use uuid::Uuid;

/// Builder for task definitions and tasks
///
/// Defaults: command `true`, 60 second interval, enabled, 30 second timeout,
/// notify on failure only.
pub struct TaskBuilder {
    definition: TaskDefinition,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let mut definition = TaskDefinition::new("test_task", "true", Schedule::every_seconds(60));
        definition.timeout_seconds = 30;
        Self {
            definition,
            next_run_at: None,
            last_run_at: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.definition.name = name.to_string();
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.definition.command = command.to_string();
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.definition.schedule = schedule;
        self
    }

    pub fn with_cron(self, expression: &str) -> Self {
        self.with_schedule(Schedule::cron(expression))
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.definition.timeout_seconds = seconds;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.definition.enabled = enabled;
        self
    }

    pub fn notify_on(mut self, success: bool, failure: bool) -> Self {
        self.definition.notify_on_success = success;
        self.definition.notify_on_failure = failure;
        self
    }

    pub fn with_next_run_at(mut self, next_run_at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(next_run_at);
        self
    }

    pub fn with_last_run_at(mut self, last_run_at: DateTime<Utc>) -> Self {
        self.last_run_at = Some(last_run_at);
        self
    }

    /// Definition as submitted through the task service
    pub fn definition(self) -> TaskDefinition {
        self.definition
    }

    /// Task as it would be stored, timestamps set to now
    pub fn build(self) -> Task {
        let mut task = Task::from_definition(self.definition, Utc::now());
        task.next_run_at = self.next_run_at;
        task.last_run_at = self.last_run_at;
        task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for execution records
pub struct ExecutionBuilder {
    execution: Execution,
}

impl ExecutionBuilder {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            execution: Execution::pending(task_id, TriggerKind::Scheduled, Utc::now()),
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerKind) -> Self {
        self.execution.trigger = trigger;
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.execution.started_at = started_at;
        self
    }

    pub fn running(mut self) -> Self {
        self.execution.status = ExecutionStatus::Running;
        self
    }

    /// Terminal record with the given status
    pub fn finished(mut self, status: ExecutionStatus, exit_code: Option<i32>) -> Self {
        self.execution.status = status;
        self.execution.exit_code = exit_code;
        self.execution.completed_at = Some(self.execution.started_at);
        self.execution.duration_ms = Some(0);
        self
    }

    pub fn build(self) -> Execution {
        self.execution
    }
}

/// Builder for executor results
pub struct ResultBuilder {
    result: ExecutionResult,
}

impl ResultBuilder {
    pub fn success() -> Self {
        Self {
            result: ExecutionResult {
                status: ExecutionStatus::Success,
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                error_message: None,
                duration_ms: 0,
            },
        }
    }

    pub fn failed(exit_code: i32) -> Self {
        Self {
            result: ExecutionResult {
                status: ExecutionStatus::Failed,
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: String::new(),
                error_message: None,
                duration_ms: 0,
            },
        }
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.result.stdout = stdout.to_string();
        self
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.result.stderr = stderr.to_string();
        self
    }

    pub fn build(self) -> ExecutionResult {
        self.result
    }
}
