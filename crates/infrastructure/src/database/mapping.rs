//! 数据库行与领域模型之间的转换辅助函数
//!
//! SQLite 中 UUID 与枚举都以 TEXT 保存，无符号整数以 INTEGER(i64) 保存。

use scheduler_core::models::{ExecutionStatus, Schedule, TriggerKind};
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn uuid(row: &SqliteRow, field_name: &str) -> SchedulerResult<Uuid> {
        let raw: String = row.try_get(field_name)?;
        Uuid::parse_str(&raw)
            .map_err(|e| SchedulerError::Serialization(format!("解析{field_name}失败: {e}")))
    }

    pub fn schedule(row: &SqliteRow) -> SchedulerResult<Schedule> {
        let schedule_type: String = row.try_get("schedule_type")?;
        let config_json: String = row.try_get("schedule_config")?;
        let config: serde_json::Value = serde_json::from_str(&config_json)
            .map_err(|e| SchedulerError::Serialization(format!("解析调度配置失败: {e}")))?;
        Schedule::from_parts(&schedule_type, config)
    }

    pub fn status(row: &SqliteRow) -> SchedulerResult<ExecutionStatus> {
        let raw: String = row.try_get("status")?;
        raw.parse()
    }

    pub fn trigger(row: &SqliteRow) -> SchedulerResult<TriggerKind> {
        let raw: String = row.try_get("trigger_kind")?;
        raw.parse()
    }

    pub fn unsigned(row: &SqliteRow, field_name: &str) -> SchedulerResult<u64> {
        let value: i64 = row.try_get(field_name)?;
        u64::try_from(value)
            .map_err(|_| SchedulerError::Serialization(format!("{field_name} 不能为负数: {value}")))
    }

    pub fn optional_unsigned(row: &SqliteRow, field_name: &str) -> SchedulerResult<Option<u64>> {
        let value: Option<i64> = row.try_get(field_name)?;
        Ok(value.map(|v| v.max(0) as u64))
    }

    /// u64 → i64，超出范围时截断到 i64::MAX
    pub fn to_db_int(value: u64) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }
}
