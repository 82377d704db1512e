pub mod sqlite_execution_store;
pub mod sqlite_task_store;

pub use sqlite_execution_store::SqliteExecutionStore;
pub use sqlite_task_store::SqliteTaskStore;

use std::str::FromStr;

use scheduler_core::SchedulerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

/// 打开SQLite连接池并执行建表迁移，数据库文件不存在时自动创建
pub async fn connect(database_url: &str, max_connections: u32) -> SchedulerResult<SqlitePool> {
    debug!("打开SQLite数据库: {}", database_url);

    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .connect_with(connect_options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    debug!("Running SQLite database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            command TEXT NOT NULL,
            schedule_type TEXT NOT NULL,
            schedule_config TEXT NOT NULL DEFAULT '{}',
            enabled INTEGER NOT NULL DEFAULT 1,
            timeout_seconds INTEGER NOT NULL DEFAULT 3600,
            notify_on_success INTEGER NOT NULL DEFAULT 0,
            notify_on_failure INTEGER NOT NULL DEFAULT 1,
            next_run_at DATETIME,
            last_run_at DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 执行历史不随任务删除，因此不加外键
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            trigger_kind TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at DATETIME NOT NULL,
            completed_at DATETIME,
            stdout TEXT,
            stderr TEXT,
            exit_code INTEGER,
            error_message TEXT,
            duration_ms INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_executions_task_id ON executions(task_id)",
        "CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)",
        "CREATE INDEX IF NOT EXISTS idx_executions_started_at ON executions(started_at)",
    ];
    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
