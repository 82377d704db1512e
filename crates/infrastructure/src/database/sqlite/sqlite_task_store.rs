use std::time::Instant;

use async_trait::async_trait;
use scheduler_core::models::Task;
use scheduler_core::traits::TaskStore;
use scheduler_core::SchedulerResult;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::database::mapping::MappingHelpers;
use crate::observability::StructuredLogger;

const TASK_COLUMNS: &str = "id, name, description, command, schedule_type, schedule_config, \
    enabled, timeout_seconds, notify_on_success, notify_on_failure, next_run_at, last_run_at, \
    created_at, updated_at";

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        Ok(Task {
            id: MappingHelpers::uuid(row, "id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            command: row.try_get("command")?,
            schedule: MappingHelpers::schedule(row)?,
            enabled: row.try_get("enabled")?,
            timeout_seconds: MappingHelpers::unsigned(row, "timeout_seconds")?,
            notify_on_success: row.try_get("notify_on_success")?,
            notify_on_failure: row.try_get("notify_on_failure")?,
            next_run_at: row.try_get("next_run_at")?,
            last_run_at: row.try_get("last_run_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id, task_name = %task.name))]
    async fn save(&self, task: &Task) -> SchedulerResult<()> {
        let start = Instant::now();
        let schedule_config = serde_json::to_string(&task.schedule.config_json()?)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (id, name, description, command, schedule_type, schedule_config,
                enabled, timeout_seconds, notify_on_success, notify_on_failure,
                next_run_at, last_run_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                command = excluded.command,
                schedule_type = excluded.schedule_type,
                schedule_config = excluded.schedule_config,
                enabled = excluded.enabled,
                timeout_seconds = excluded.timeout_seconds,
                notify_on_success = excluded.notify_on_success,
                notify_on_failure = excluded.notify_on_failure,
                next_run_at = excluded.next_run_at,
                last_run_at = excluded.last_run_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.command)
        .bind(task.schedule.schedule_type().as_str())
        .bind(schedule_config)
        .bind(task.enabled)
        .bind(MappingHelpers::to_db_int(task.timeout_seconds))
        .bind(task.notify_on_success)
        .bind(task.notify_on_failure)
        .bind(task.next_run_at)
        .bind(task.last_run_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        StructuredLogger::log_database_operation(
            "save",
            "tasks",
            start.elapsed().as_millis() as u64,
            Some(result.rows_affected()),
        );
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn load(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => {
                debug!("查询任务不存在: ID {}", id);
                Ok(None)
            }
        }
    }

    async fn load_all(&self) -> SchedulerResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, rowid ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
