//! Metrics collector for the scheduler
//!
//! All metrics go through the `metrics` facade. Without an installed recorder
//! every call is a no-op, so tests can construct the collector freely.

use metrics::{counter, gauge, histogram, Gauge, Histogram};
use tracing::debug;

/// Metrics collector for the scheduler
pub struct MetricsCollector {
    running_executions: Gauge,
    scheduler_tick_duration: Histogram,
    database_operation_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            running_executions: gauge!("scheduler_running_executions"),
            scheduler_tick_duration: histogram!("scheduler_tick_duration_seconds"),
            database_operation_duration: histogram!(
                "scheduler_database_operation_duration_seconds"
            ),
        }
    }

    // Execution metrics

    /// Record a finished execution, labelled by terminal status and trigger
    pub fn record_execution(&self, status: &str, trigger: &str, duration_seconds: f64) {
        counter!(
            "scheduler_executions_total",
            "status" => status.to_string(),
            "trigger" => trigger.to_string()
        )
        .increment(1);
        histogram!(
            "scheduler_execution_duration_seconds",
            "status" => status.to_string()
        )
        .record(duration_seconds);

        debug!(
            status = status,
            trigger = trigger,
            duration_seconds = duration_seconds,
            "Execution metrics recorded"
        );
    }

    /// Record a fire that was skipped because the task was already running
    pub fn record_skipped_fire(&self) {
        counter!("scheduler_skipped_fires_total").increment(1);
    }

    /// Update the number of in-flight executions
    pub fn update_running_executions(&self, count: usize) {
        self.running_executions.set(count as f64);
    }

    // Scheduler metrics

    /// Record the duration of one scheduler tick
    pub fn record_tick_duration(&self, duration_seconds: f64) {
        self.scheduler_tick_duration.record(duration_seconds);
    }

    /// Record a tick that ended with an error
    pub fn record_tick_error(&self) {
        counter!("scheduler_tick_errors_total").increment(1);
    }

    // Notification metrics

    /// Record a notification delivery attempt
    pub fn record_notification(&self, notifier: &str, success: bool) {
        counter!(
            "scheduler_notifications_total",
            "notifier" => notifier.to_string(),
            "result" => if success { "ok" } else { "error" }
        )
        .increment(1);
    }

    // Storage metrics

    /// Record database operation duration
    pub fn record_database_operation(&self, operation: &str, duration_seconds: f64) {
        self.database_operation_duration.record(duration_seconds);

        debug!(
            operation = operation,
            duration_seconds = duration_seconds,
            "Database operation completed"
        );
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
