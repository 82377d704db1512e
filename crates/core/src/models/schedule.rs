use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, SchedulerError};

/// 调度规则
///
/// 以 `schedule_type` + `schedule_config` 的形式序列化：
///
/// ```json
/// {"schedule_type": "cron", "schedule_config": {"expression": "*/15 * * * *"}}
/// {"schedule_type": "interval", "schedule_config": {"hours": 1}}
/// {"schedule_type": "once", "schedule_config": {"run_date": "2030-01-01T00:00:00Z"}}
/// {"schedule_type": "startup", "schedule_config": {}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "schedule_type",
    content = "schedule_config",
    rename_all = "lowercase"
)]
pub enum Schedule {
    /// 5字段CRON表达式（分 时 日 月 周）
    Cron { expression: String },
    /// 固定间隔
    Interval(IntervalConfig),
    /// 指定时间点执行一次
    Once { run_date: DateTime<Utc> },
    /// 调度器启动时执行一次
    Startup {},
}

/// 间隔配置，各字段缺省为0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
}

impl IntervalConfig {
    pub fn every_seconds(seconds: u64) -> Self {
        Self {
            seconds,
            ..Self::default()
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.days
            .saturating_mul(86_400)
            .saturating_add(self.hours.saturating_mul(3_600))
            .saturating_add(self.minutes.saturating_mul(60))
            .saturating_add(self.seconds)
    }

    pub fn period(&self) -> Duration {
        let seconds = i64::try_from(self.total_seconds())
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        Duration::seconds(seconds)
    }

    pub fn is_zero(&self) -> bool {
        self.total_seconds() == 0
    }
}

/// 调度类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Cron,
    Interval,
    Once,
    Startup,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
            ScheduleType::Once => "once",
            ScheduleType::Startup => "startup",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cron" => Ok(ScheduleType::Cron),
            "interval" => Ok(ScheduleType::Interval),
            "once" => Ok(ScheduleType::Once),
            "startup" => Ok(ScheduleType::Startup),
            other => Err(SchedulerError::Validation(format!(
                "未知的调度类型: {other}"
            ))),
        }
    }
}

impl Schedule {
    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule::Cron {
            expression: expression.into(),
        }
    }

    pub fn every_seconds(seconds: u64) -> Self {
        Schedule::Interval(IntervalConfig::every_seconds(seconds))
    }

    pub fn once(run_date: DateTime<Utc>) -> Self {
        Schedule::Once { run_date }
    }

    pub fn startup() -> Self {
        Schedule::Startup {}
    }

    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            Schedule::Cron { .. } => ScheduleType::Cron,
            Schedule::Interval(_) => ScheduleType::Interval,
            Schedule::Once { .. } => ScheduleType::Once,
            Schedule::Startup {} => ScheduleType::Startup,
        }
    }

    /// 是否为周期性调度（执行后需要重新计算下次触发时间）
    pub fn is_recurring(&self) -> bool {
        matches!(self, Schedule::Cron { .. } | Schedule::Interval(_))
    }

    /// 仅 `schedule_config` 部分，用于分列存储
    pub fn config_json(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("schedule_config")
            .map(serde_json::Value::take)
            .unwrap_or_else(|| serde_json::json!({})))
    }

    /// 由分列存储的类型和配置还原
    pub fn from_parts(schedule_type: &str, schedule_config: serde_json::Value) -> Result<Self> {
        let schedule_type: ScheduleType = schedule_type.parse()?;
        let value = serde_json::json!({
            "schedule_type": schedule_type.as_str(),
            "schedule_config": schedule_config,
        });
        serde_json::from_value(value).map_err(|e| {
            SchedulerError::Validation(format!("{schedule_type} 调度配置无效: {e}"))
        })
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron { expression } => write!(f, "cron({expression})"),
            Schedule::Interval(interval) => write!(f, "every {}s", interval.total_seconds()),
            Schedule::Once { run_date } => write!(f, "once({})", run_date.to_rfc3339()),
            Schedule::Startup {} => f.write_str("startup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_schedule_serde_shape() {
        let schedule = Schedule::cron("*/15 * * * *");
        let value = serde_json::to_value(&schedule).unwrap();
        assert_eq!(
            value,
            json!({"schedule_type": "cron", "schedule_config": {"expression": "*/15 * * * *"}})
        );

        let startup: Schedule =
            serde_json::from_value(json!({"schedule_type": "startup", "schedule_config": {}}))
                .unwrap();
        assert_eq!(startup, Schedule::startup());
    }

    #[test]
    fn test_interval_defaults_missing_units_to_zero() {
        let schedule = Schedule::from_parts("interval", json!({"minutes": 5})).unwrap();
        match schedule {
            Schedule::Interval(interval) => {
                assert_eq!(interval.total_seconds(), 300);
                assert_eq!(interval.period(), Duration::minutes(5));
            }
            other => panic!("unexpected schedule: {other:?}"),
        }

        let with_days = IntervalConfig {
            days: 1,
            hours: 2,
            ..IntervalConfig::default()
        };
        assert_eq!(with_days.total_seconds(), 93_600);
        assert!(IntervalConfig::default().is_zero());
    }

    #[test]
    fn test_parts_round_trip_through_columns() {
        let run_date = Utc.with_ymd_and_hms(2031, 5, 1, 8, 30, 0).unwrap();
        let schedule = Schedule::once(run_date);
        let config = schedule.config_json().unwrap();
        let restored =
            Schedule::from_parts(schedule.schedule_type().as_str(), config).unwrap();
        assert_eq!(restored, schedule);
    }

    #[test]
    fn test_from_parts_rejects_unknown_type_and_bad_config() {
        assert!(Schedule::from_parts("hourly", json!({})).is_err());
        let err = Schedule::from_parts("cron", json!({"expr": "* * * * *"})).unwrap_err();
        assert!(err.is_validation());
    }
}
