use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::execution::{Execution, ExecutionStatus};

/// 发给通知器的内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub task_id: Uuid,
    pub task_name: String,
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub output_excerpt: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub host: String,
}

impl NotificationPayload {
    pub fn from_execution(
        task_name: &str,
        execution: &Execution,
        excerpt_chars: usize,
        host: &str,
    ) -> Self {
        Self {
            task_id: execution.task_id,
            task_name: task_name.to_string(),
            execution_id: execution.id,
            status: execution.status,
            exit_code: execution.exit_code,
            error_message: execution.error_message.clone(),
            output_excerpt: output_excerpt(execution, excerpt_chars),
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            host: host.to_string(),
        }
    }

    pub fn title(&self) -> String {
        format!("Task {}", self.status)
    }

    pub fn message(&self) -> String {
        match self.exit_code {
            Some(code) => format!("Task '{}' {} (exit code {code})", self.task_name, self.status),
            None => format!("Task '{}' {}", self.task_name, self.status),
        }
    }
}

/// 成功时取stdout尾部，其他情况优先stderr，最后是错误信息
fn output_excerpt(execution: &Execution, max_chars: usize) -> String {
    let stdout = execution.stdout.as_deref().unwrap_or_default();
    let stderr = execution.stderr.as_deref().unwrap_or_default();
    let source = match execution.status {
        ExecutionStatus::Success => stdout,
        _ if !stderr.trim().is_empty() => stderr,
        _ if !stdout.trim().is_empty() => stdout,
        _ => execution.error_message.as_deref().unwrap_or_default(),
    };
    tail_chars(source.trim_end(), max_chars)
}

/// 保留字符串末尾最多 `max_chars` 个字符，截断时加前缀 `…`
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(total - max_chars).collect();
    format!("…{skipped}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionResult, TriggerKind};

    fn finished(status: ExecutionStatus, stdout: &str, stderr: &str) -> Execution {
        let now = Utc::now();
        let mut execution = Execution::pending(Uuid::new_v4(), TriggerKind::Scheduled, now);
        execution
            .complete(
                ExecutionResult {
                    status,
                    exit_code: Some(if status == ExecutionStatus::Success { 0 } else { 1 }),
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    error_message: None,
                    duration_ms: 5,
                },
                now,
            )
            .unwrap();
        execution
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("hello", 10), "hello");
        assert_eq!(tail_chars("hello world", 5), "…world");
        assert_eq!(tail_chars("日志输出内容", 2), "…内容");
    }

    #[test]
    fn test_excerpt_prefers_stderr_on_failure() {
        let execution = finished(ExecutionStatus::Failed, "some output", "boom\n");
        let payload = NotificationPayload::from_execution("backup", &execution, 100, "host-a");
        assert_eq!(payload.output_excerpt, "boom");
        assert_eq!(payload.title(), "Task failed");
        assert_eq!(payload.message(), "Task 'backup' failed (exit code 1)");
        assert_eq!(payload.host, "host-a");
    }

    #[test]
    fn test_excerpt_uses_stdout_on_success() {
        let execution = finished(ExecutionStatus::Success, "done\n", "warning");
        let payload = NotificationPayload::from_execution("backup", &execution, 100, "h");
        assert_eq!(payload.output_excerpt, "done");
    }
}
