//! 调度规则求值
//!
//! 纯函数，不读取系统时间，所有时间都由调用方传入。

use chrono::{DateTime, Utc};
use scheduler_core::models::Schedule;
use scheduler_core::{SchedulerError, SchedulerResult};

use crate::cron_utils::CronScheduler;

pub struct ScheduleEvaluator;

impl ScheduleEvaluator {
    /// 计算下一次触发时间
    ///
    /// - `cron`: 严格晚于 `after` 的第一个匹配分钟
    /// - `interval`: `last_run + 周期`，从未执行过则为 `after`
    /// - `once`: `run_date` 晚于 `after` 且尚未执行时返回 `run_date`
    /// - `startup`: 本进程内尚未执行时返回 `after`
    pub fn next_fire(
        schedule: &Schedule,
        after: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        match schedule {
            Schedule::Cron { expression } => {
                Ok(CronScheduler::new(expression)?.next_execution_time(after))
            }
            Schedule::Interval(interval) => {
                if interval.is_zero() {
                    return Err(SchedulerError::Validation("执行间隔必须大于0".to_string()));
                }
                Ok(match last_run {
                    Some(last) => last.checked_add_signed(interval.period()),
                    None => Some(after),
                })
            }
            Schedule::Once { run_date } => {
                Ok((last_run.is_none() && *run_date > after).then_some(*run_date))
            }
            Schedule::Startup {} => Ok(last_run.is_none().then_some(after)),
        }
    }

    /// 创建或修改调度规则时的校验
    pub fn validate(schedule: &Schedule, now: DateTime<Utc>) -> SchedulerResult<()> {
        match schedule {
            Schedule::Cron { expression } => CronScheduler::validate_cron_expression(expression),
            Schedule::Interval(interval) if interval.is_zero() => Err(
                SchedulerError::Validation("执行间隔必须大于0".to_string()),
            ),
            Schedule::Interval(_) => Ok(()),
            Schedule::Once { run_date } if *run_date <= now => Err(SchedulerError::Validation(
                format!("一次性任务的执行时间必须晚于当前时间: {}", run_date.to_rfc3339()),
            )),
            Schedule::Once { .. } | Schedule::Startup {} => Ok(()),
        }
    }

    /// 预览 `from` 之后的最多 `count` 次触发时间
    ///
    /// `interval` 按 `from` 起每隔一个周期推算；`startup` 没有可预览的时间。
    pub fn upcoming(
        schedule: &Schedule,
        from: DateTime<Utc>,
        count: usize,
    ) -> SchedulerResult<Vec<DateTime<Utc>>> {
        match schedule {
            Schedule::Cron { expression } => {
                Ok(CronScheduler::new(expression)?.upcoming_times(from, count))
            }
            Schedule::Interval(interval) => {
                if interval.is_zero() {
                    return Err(SchedulerError::Validation("执行间隔必须大于0".to_string()));
                }
                let period = interval.period();
                Ok(std::iter::successors(from.checked_add_signed(period), |t| {
                    t.checked_add_signed(period)
                })
                .take(count)
                .collect())
            }
            Schedule::Once { run_date } => {
                Ok((*run_date > from && count > 0).then_some(*run_date).into_iter().collect())
            }
            Schedule::Startup {} => Ok(Vec::new()),
        }
    }
}
