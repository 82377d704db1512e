//! 应用配置
//!
//! 配置来源优先级（后者覆盖前者）：内置默认值 → TOML配置文件 → `SCHEDULER__` 前缀环境变量。

pub mod app_config;
pub mod validation;

pub use app_config::{
    AppConfig, DatabaseConfig, ExecutorConfig, NotificationConfig, ObservabilityConfig,
    SchedulerConfig, DEFAULT_CONFIG_PATHS, MEMORY_DATABASE_URL,
};
pub use validation::{ConfigValidator, ValidationUtils};
