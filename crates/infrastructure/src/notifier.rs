//! 通知器实现
//!
//! - [`LogNotifier`]: 写入结构化日志
//! - [`WebhookNotifier`]: 以JSON POST到配置的地址
//! - [`CompositeNotifier`]: 依次投递到多个通知器

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::config::NotificationConfig;
use scheduler_core::models::{ExecutionStatus, NotificationPayload};
use scheduler_core::traits::Notifier;
use scheduler_core::{SchedulerError, SchedulerResult};
use serde_json::json;
use tracing::{info, warn};

/// 当前主机名，取不到时为 `unknown`
pub fn local_hostname() -> String {
    hostname::get()
        .unwrap_or_else(|_| "unknown".into())
        .to_string_lossy()
        .to_string()
}

/// 把通知写入日志
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> SchedulerResult<()> {
        if payload.status == ExecutionStatus::Success {
            info!(
                event = "task_notification",
                task.id = %payload.task_id,
                task.name = %payload.task_name,
                execution.id = %payload.execution_id,
                execution.status = %payload.status,
                host = %payload.host,
                "{}",
                payload.message()
            );
        } else {
            warn!(
                event = "task_notification",
                task.id = %payload.task_id,
                task.name = %payload.task_name,
                execution.id = %payload.execution_id,
                execution.status = %payload.status,
                execution.exit_code = ?payload.exit_code,
                output = %payload.output_excerpt,
                host = %payload.host,
                "{}",
                payload.message()
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Webhook通知器
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn body(payload: &NotificationPayload) -> serde_json::Value {
        json!({
            "title": payload.title(),
            "message": payload.message(),
            "task_id": payload.task_id,
            "task_name": payload.task_name,
            "execution_id": payload.execution_id,
            "status": payload.status,
            "exit_code": payload.exit_code,
            "error_message": payload.error_message,
            "output": payload.output_excerpt,
            "started_at": payload.started_at,
            "completed_at": payload.completed_at,
            "host": payload.host,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> SchedulerResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::body(payload))
            .send()
            .await
            .map_err(|e| SchedulerError::Notification(format!("请求 {} 失败: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchedulerError::Notification(format!(
                "{} 返回状态码 {}",
                self.url,
                status.as_u16()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// 组合通知器，单个通知器失败不影响其他通知器
#[derive(Default)]
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// 按通知配置组装
    pub fn from_config(config: &NotificationConfig) -> SchedulerResult<Self> {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if config.log_enabled {
            notifiers.push(Arc::new(LogNotifier::new()));
        }
        if let Some(url) = &config.webhook_url {
            notifiers.push(Arc::new(WebhookNotifier::new(
                url.clone(),
                Duration::from_secs(config.webhook_timeout_seconds),
            )?));
        }
        Ok(Self { notifiers })
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> SchedulerResult<()> {
        let mut failures = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(payload).await {
                failures.push(format!("{}: {e}", notifier.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::Notification(failures.join("; ")))
        }
    }

    fn name(&self) -> &str {
        "composite"
    }
}
