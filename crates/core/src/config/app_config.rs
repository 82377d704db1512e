use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::{SchedulerError, SchedulerResult};

/// 未指定配置文件时依次查找的路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/scheduler.toml",
    "scheduler.toml",
    "/etc/scheduler/config.toml",
];

/// 内存存储的数据库地址
pub const MEMORY_DATABASE_URL: &str = "memory";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub notification: NotificationConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` 或 `memory`
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:scheduler.db".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_DATABASE_URL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 调度周期（毫秒），决定调度精度
    pub tick_interval_ms: u64,
    /// 关闭时等待执行中任务的最长时间
    pub drain_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            drain_timeout_seconds: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub shell: String,
    pub shell_arg: String,
    pub working_dir: Option<String>,
    /// stdout/stderr 各自保留的最大字节数
    pub max_output_bytes: usize,
    /// SIGTERM 之后等待多久再 SIGKILL
    pub kill_grace_period_seconds: u64,
    /// 进程退出后等待输出读取完成的时间
    pub output_drain_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell().to_string(),
            shell_arg: default_shell_arg().to_string(),
            working_dir: None,
            max_output_bytes: 1024 * 1024,
            kill_grace_period_seconds: 2,
            output_drain_timeout_ms: 500,
        }
    }
}

#[cfg(unix)]
fn default_shell() -> &'static str {
    "/bin/sh"
}

#[cfg(not(unix))]
fn default_shell() -> &'static str {
    "cmd"
}

#[cfg(unix)]
fn default_shell_arg() -> &'static str {
    "-c"
}

#[cfg(not(unix))]
fn default_shell_arg() -> &'static str {
    "/C"
}

impl ExecutorConfig {
    pub fn kill_grace_period(&self) -> Duration {
        Duration::from_secs(self.kill_grace_period_seconds)
    }

    pub fn output_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.output_drain_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// 把通知写入日志
    pub log_enabled: bool,
    pub webhook_url: Option<String>,
    pub webhook_timeout_seconds: u64,
    /// 通知中附带的输出摘要长度（字符）
    pub excerpt_chars: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log_enabled: true,
            webhook_url: None,
            webhook_timeout_seconds: 10,
            excerpt_chars: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `pretty` 或 `json`
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_listen: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_listen: "127.0.0.1:9464".to_string(),
        }
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_not_empty(&self.url, "database.url")?;
        if !self.is_memory() && !self.url.starts_with("sqlite:") {
            return Err(SchedulerError::Configuration(format!(
                "database.url 只支持 sqlite:<path> 或 {MEMORY_DATABASE_URL}: {}",
                self.url
            )));
        }
        ValidationUtils::validate_positive(self.max_connections as u64, "database.max_connections")
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_positive(self.tick_interval_ms, "scheduler.tick_interval_ms")
    }
}

impl ConfigValidator for ExecutorConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_not_empty(&self.shell, "executor.shell")?;
        ValidationUtils::validate_positive(self.max_output_bytes as u64, "executor.max_output_bytes")
    }
}

impl ConfigValidator for NotificationConfig {
    fn validate(&self) -> SchedulerResult<()> {
        if let Some(url) = &self.webhook_url {
            ValidationUtils::validate_http_url(url, "notification.webhook_url")?;
            ValidationUtils::validate_positive(
                self.webhook_timeout_seconds,
                "notification.webhook_timeout_seconds",
            )?;
        }
        ValidationUtils::validate_positive(self.excerpt_chars as u64, "notification.excerpt_chars")
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_one_of(
            &self.log_level,
            "observability.log_level",
            &["trace", "debug", "info", "warn", "error"],
        )?;
        ValidationUtils::validate_one_of(
            &self.log_format,
            "observability.log_format",
            &["json", "pretty"],
        )?;
        if self.metrics_enabled {
            self.metrics_listen.parse::<SocketAddr>().map_err(|e| {
                SchedulerError::Configuration(format!(
                    "observability.metrics_listen 不是有效的地址 {}: {e}",
                    self.metrics_listen
                ))
            })?;
        }
        Ok(())
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> SchedulerResult<()> {
        self.database.validate()?;
        self.scheduler.validate()?;
        self.executor.validate()?;
        self.notification.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

impl AppConfig {
    /// 加载配置：配置文件 → `SCHEDULER__` 前缀的环境变量，缺省字段使用默认值
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.database.url, "sqlite:scheduler.db");
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.scheduler.drain_timeout(), Duration::from_secs(30));
        assert_eq!(config.executor.max_output_bytes, 1024 * 1024);
        assert!(config.notification.log_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_partial_toml() {
        let toml_str = r#"
[database]
url = "memory"

[scheduler]
tick_interval_ms = 250

[notification]
webhook_url = "https://hooks.example.com/scheduler"
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert!(config.database.is_memory());
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.scheduler.tick_interval_ms, 250);
        assert_eq!(config.scheduler.drain_timeout_seconds, 30);
        assert_eq!(
            config.notification.webhook_url.as_deref(),
            Some("https://hooks.example.com/scheduler")
        );
    }

    #[test]
    fn test_app_config_validation_errors() {
        let mut config = AppConfig::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.notification.webhook_url = Some("ftp://example.com".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.url = "postgresql://localhost/scheduler".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.observability.metrics_enabled = true;
        config.observability.metrics_listen = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_config_load_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[executor]\nkill_grace_period_seconds = 5\n\n[observability]\nlog_format = \"json\""
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.executor.kill_grace_period_seconds, 5);
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.executor.shell, AppConfig::default().executor.shell);
    }

    #[test]
    fn test_app_config_load_missing_file() {
        assert!(AppConfig::load(Some("/nonexistent/scheduler.toml")).is_err());
    }

    #[test]
    fn test_app_config_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&toml_str).unwrap(), config);
    }
}
