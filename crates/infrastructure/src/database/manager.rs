use std::sync::Arc;

use scheduler_core::config::DatabaseConfig;
use scheduler_core::traits::{ExecutionHistoryStore, TaskStore};
use scheduler_core::SchedulerResult;
use sqlx::SqlitePool;
use tracing::info;

use super::memory::{InMemoryExecutionStore, InMemoryTaskStore};
use super::sqlite::{self, SqliteExecutionStore, SqliteTaskStore};

/// 根据配置选择的存储后端
pub struct DatabaseManager {
    pub task_store: Arc<dyn TaskStore>,
    pub execution_store: Arc<dyn ExecutionHistoryStore>,
    pool: Option<SqlitePool>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        if config.is_memory() {
            info!("使用内存存储，进程退出后数据不保留");
            return Ok(Self::in_memory());
        }

        let pool = sqlite::connect(&config.url, config.max_connections).await?;
        info!("已连接SQLite数据库: {}", config.url);
        Ok(Self {
            task_store: Arc::new(SqliteTaskStore::new(pool.clone())),
            execution_store: Arc::new(SqliteExecutionStore::new(pool.clone())),
            pool: Some(pool),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            task_store: Arc::new(InMemoryTaskStore::new()),
            execution_store: Arc::new(InMemoryExecutionStore::new()),
            pool: None,
        }
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query("SELECT 1").execute(pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
