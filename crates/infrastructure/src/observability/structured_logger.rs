//! Structured logging utilities
//!
//! Every scheduler event is emitted with an `event` field so that JSON logs can
//! be filtered without parsing the message text.

use chrono::{DateTime, Utc};
use scheduler_core::models::{Execution, ExecutionStatus, Task, TriggerKind};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log task registration or update
    pub fn log_task_saved(task: &Task, created: bool) {
        info!(
            event = if created { "task_created" } else { "task_updated" },
            task.id = %task.id,
            task.name = %task.name,
            task.schedule = %task.schedule,
            task.enabled = task.enabled,
            task.next_run_at = ?task.next_run_at,
            "Task saved"
        );
    }

    /// Log task removal
    pub fn log_task_deleted(task_id: Uuid, task_name: &str) {
        info!(
            event = "task_deleted",
            task.id = %task_id,
            task.name = task_name,
            "Task deleted"
        );
    }

    /// Log task enable/disable
    pub fn log_task_toggled(task_id: Uuid, task_name: &str, enabled: bool) {
        info!(
            event = if enabled { "task_enabled" } else { "task_disabled" },
            task.id = %task_id,
            task.name = task_name,
            "Task enabled state changed"
        );
    }

    /// Log a fire handed to the execution coordinator
    pub fn log_task_dispatched(
        task: &Task,
        trigger: TriggerKind,
        scheduled_for: Option<DateTime<Utc>>,
    ) {
        info!(
            event = "task_dispatched",
            task.id = %task.id,
            task.name = %task.name,
            trigger = %trigger,
            task.scheduled_for = ?scheduled_for,
            "Task dispatched"
        );
    }

    /// Log a fire skipped because of an in-flight execution
    pub fn log_fire_skipped(task_id: Uuid, task_name: &str, trigger: TriggerKind) {
        warn!(
            event = "fire_skipped",
            task.id = %task_id,
            task.name = task_name,
            trigger = %trigger,
            "Task is already running, fire skipped"
        );
    }

    /// Log task execution start
    pub fn log_execution_start(execution: &Execution, task_name: &str) {
        info!(
            event = "execution_start",
            execution.id = %execution.id,
            task.id = %execution.task_id,
            task.name = task_name,
            trigger = %execution.trigger,
            "Task execution started"
        );
    }

    /// Log task execution completion
    pub fn log_execution_complete(execution: &Execution, task_name: &str) {
        let duration_ms = execution.duration_ms.unwrap_or_default();
        if execution.status == ExecutionStatus::Success {
            info!(
                event = "execution_complete",
                execution.id = %execution.id,
                task.id = %execution.task_id,
                task.name = task_name,
                execution.status = %execution.status,
                execution.exit_code = ?execution.exit_code,
                execution.duration_ms = duration_ms,
                "Task execution completed successfully"
            );
        } else {
            error!(
                event = "execution_failed",
                execution.id = %execution.id,
                task.id = %execution.task_id,
                task.name = task_name,
                execution.status = %execution.status,
                execution.exit_code = ?execution.exit_code,
                execution.duration_ms = duration_ms,
                execution.error = execution.error_message.as_deref().unwrap_or("none"),
                "Task execution did not succeed"
            );
        }
    }

    /// Log execution abandoned at shutdown or recovered after restart
    pub fn log_execution_abandoned(execution_id: Uuid, task_id: Uuid, reason: &str) {
        warn!(
            event = "execution_abandoned",
            execution.id = %execution_id,
            task.id = %task_id,
            reason = reason,
            "Execution closed without a result"
        );
    }

    /// Log notification delivery result
    pub fn log_notification(notifier: &str, execution_id: Uuid, result: Result<(), &str>) {
        match result {
            Ok(()) => debug!(
                event = "notification_sent",
                notifier = notifier,
                execution.id = %execution_id,
                "Notification delivered"
            ),
            Err(message) => warn!(
                event = "notification_failed",
                notifier = notifier,
                execution.id = %execution_id,
                error.message = message,
                "Notification delivery failed"
            ),
        }
    }

    /// Log database operation
    pub fn log_database_operation(
        operation: &str,
        table: &str,
        duration_ms: u64,
        affected_rows: Option<u64>,
    ) {
        debug!(
            event = "database_operation",
            db.operation = operation,
            db.table = table,
            db.duration_ms = duration_ms,
            db.affected_rows = affected_rows,
            "Database operation completed"
        );
    }

    /// Log system error
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}
