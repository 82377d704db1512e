use std::time::Instant;

use async_trait::async_trait;
use scheduler_core::models::Execution;
use scheduler_core::traits::ExecutionHistoryStore;
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use crate::database::mapping::MappingHelpers;
use crate::observability::StructuredLogger;

const EXECUTION_COLUMNS: &str = "id, task_id, trigger_kind, status, started_at, completed_at, \
    stdout, stderr, exit_code, error_message, duration_ms";

pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &SqliteRow) -> SchedulerResult<Execution> {
        Ok(Execution {
            id: MappingHelpers::uuid(row, "id")?,
            task_id: MappingHelpers::uuid(row, "task_id")?,
            trigger: MappingHelpers::trigger(row)?,
            status: MappingHelpers::status(row)?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            stdout: row.try_get("stdout")?,
            stderr: row.try_get("stderr")?,
            exit_code: row.try_get("exit_code")?,
            error_message: row.try_get("error_message")?,
            duration_ms: MappingHelpers::optional_unsigned(row, "duration_ms")?,
        })
    }
}

#[async_trait]
impl ExecutionHistoryStore for SqliteExecutionStore {
    #[instrument(skip(self, execution), fields(execution_id = %execution.id, task_id = %execution.task_id))]
    async fn append(&self, execution: &Execution) -> SchedulerResult<bool> {
        let start = Instant::now();
        // 单条 INSERT ... SELECT 在同一写事务内完成检查与插入
        let result = sqlx::query(
            r#"
            INSERT INTO executions (id, task_id, trigger_kind, status, started_at, completed_at,
                stdout, stderr, exit_code, error_message, duration_ms)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            WHERE ?12 = 0 OR NOT EXISTS (
                SELECT 1 FROM executions
                WHERE task_id = ?2 AND status IN ('pending', 'running')
            )
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.task_id.to_string())
        .bind(execution.trigger.as_str())
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.stdout)
        .bind(&execution.stderr)
        .bind(execution.exit_code)
        .bind(&execution.error_message)
        .bind(execution.duration_ms.map(MappingHelpers::to_db_int))
        .bind(execution.status.is_active())
        .execute(&self.pool)
        .await?;

        StructuredLogger::log_database_operation(
            "append",
            "executions",
            start.elapsed().as_millis() as u64,
            Some(result.rows_affected()),
        );
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id, status = %execution.status))]
    async fn update(&self, execution: &Execution) -> SchedulerResult<()> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?2, started_at = ?3, completed_at = ?4, stdout = ?5, stderr = ?6,
                exit_code = ?7, error_message = ?8, duration_ms = ?9
            WHERE id = ?1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.stdout)
        .bind(&execution.stderr)
        .bind(execution.exit_code)
        .bind(&execution.error_message)
        .bind(execution.duration_ms.map(MappingHelpers::to_db_int))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let row = sqlx::query("SELECT status FROM executions WHERE id = ?1")
                .bind(execution.id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            return match row {
                Some(row) => Err(SchedulerError::InvalidStateTransition {
                    from: MappingHelpers::status(&row)?,
                    to: execution.status,
                }),
                None => Err(SchedulerError::ExecutionNotFound { id: execution.id }),
            };
        }

        StructuredLogger::log_database_operation(
            "update",
            "executions",
            start.elapsed().as_millis() as u64,
            Some(result.rows_affected()),
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Option<Execution>> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn list(
        &self,
        task_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Execution>> {
        // SQLite 中 LIMIT -1 表示不限制
        let limit = limit.map(|n| n.min(i64::MAX as usize) as i64).unwrap_or(-1);
        let rows = match task_id {
            Some(task_id) => {
                let sql = format!(
                    "SELECT {EXECUTION_COLUMNS} FROM executions WHERE task_id = ?1 \
                     ORDER BY started_at DESC, rowid DESC LIMIT ?2"
                );
                sqlx::query(&sql)
                    .bind(task_id.to_string())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {EXECUTION_COLUMNS} FROM executions \
                     ORDER BY started_at DESC, rowid DESC LIMIT ?1"
                );
                sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn list_unfinished(&self) -> SchedulerResult<Vec<Execution>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions \
             WHERE status IN ('pending', 'running') ORDER BY started_at ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_execution).collect()
    }
}
