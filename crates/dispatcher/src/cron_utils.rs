use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::debug;

use scheduler_core::{Result, SchedulerError};

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// CRON表达式解析和调度工具
///
/// 接受标准的5字段表达式（分 时 日 月 周），在交给 `cron` crate 之前转换成它的6字段格式：
/// - 补上固定为 `0` 的秒字段
/// - 月份名称统一转成数字
/// - 星期字段展开为星期名称列表，`0` 和 `7` 都表示周日
///
/// 日和星期两个字段同时受限时要求两者都匹配。所有时间按UTC计算。
#[derive(Debug)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> Result<Self> {
        let normalized = Self::normalize_expression(cron_expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(cron_expr, e))?;
        debug!("CRON表达式 '{}' 规范化为 '{}'", cron_expr, normalized);

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> Result<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 把5字段表达式转换成 `cron` crate 使用的6字段表达式
    pub fn normalize_expression(cron_expr: &str) -> Result<String> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                cron_expr,
                format!("需要5个字段（分 时 日 月 周），实际为 {} 个", fields.len()),
            ));
        }

        let month = normalize_month_field(fields[3]).map_err(|msg| invalid(cron_expr, msg))?;
        let weekday = normalize_weekday_field(fields[4]).map_err(|msg| invalid(cron_expr, msg))?;

        Ok(format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], month, weekday
        ))
    }
}

fn invalid(expr: &str, message: impl ToString) -> SchedulerError {
    SchedulerError::InvalidCron {
        expr: expr.to_string(),
        message: message.to_string(),
    }
}

/// 月份名称（不区分大小写）替换为 1..=12
fn normalize_month_field(field: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(field.len());
    let mut word = String::new();
    for ch in field.chars().chain(std::iter::once(',')) {
        if ch.is_ascii_alphabetic() {
            word.push(ch);
            continue;
        }
        if !word.is_empty() {
            let upper = word.to_ascii_uppercase();
            let index = MONTH_NAMES
                .iter()
                .position(|name| *name == upper)
                .ok_or_else(|| format!("无效的月份名称: {word}"))?;
            out.push_str(&(index + 1).to_string());
            word.clear();
        }
        out.push(ch);
    }
    out.pop();
    Ok(out)
}

/// 星期字段展开为名称列表，消除不同实现对数字编号的差异
fn normalize_weekday_field(field: &str) -> std::result::Result<String, String> {
    if field == "*" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("无效的星期步长: {item}"))?;
                if step == 0 {
                    return Err(format!("星期步长不能为0: {item}"));
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (parse_weekday(a)?, parse_weekday(b)?),
                // `N/step` 表示从N开始到周六
                None if step > 1 => (parse_weekday(range)?, 6),
                None => {
                    let day = parse_weekday(range)?;
                    (day, day)
                }
            },
        };
        if start > end {
            return Err(format!("星期范围起点大于终点: {item}"));
        }

        let mut day = start;
        while day <= end {
            days.insert(day % 7);
            day += step;
        }
    }

    if days.len() == 7 {
        return Ok("*".to_string());
    }
    Ok(days
        .into_iter()
        .map(|day| WEEKDAY_NAMES[day as usize])
        .collect::<Vec<_>>()
        .join(","))
}

/// 解析单个星期值，返回 0..=7（0和7都表示周日）
fn parse_weekday(value: &str) -> std::result::Result<u32, String> {
    if let Ok(number) = value.parse::<u32>() {
        if number > 7 {
            return Err(format!("星期取值必须在0到7之间: {value}"));
        }
        return Ok(number);
    }
    WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .map(|index| index as u32)
        .ok_or_else(|| format!("无效的星期名称: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_seconds_field() {
        assert_eq!(
            CronScheduler::normalize_expression("*/15 * * * *").unwrap(),
            "0 */15 * * * *"
        );
    }

    #[test]
    fn test_normalize_weekday_numbers() {
        assert_eq!(normalize_weekday_field("0").unwrap(), "Sun");
        assert_eq!(normalize_weekday_field("7").unwrap(), "Sun");
        assert_eq!(normalize_weekday_field("1-5").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(normalize_weekday_field("5-7").unwrap(), "Sun,Fri,Sat");
        assert_eq!(normalize_weekday_field("*/2").unwrap(), "Sun,Tue,Thu,Sat");
        assert_eq!(normalize_weekday_field("0-7").unwrap(), "*");
    }

    #[test]
    fn test_normalize_weekday_names() {
        assert_eq!(normalize_weekday_field("MON-FRI").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(normalize_weekday_field("sat,sun").unwrap(), "Sun,Sat");
        assert!(normalize_weekday_field("Fri-Mon").is_err());
        assert!(normalize_weekday_field("8").is_err());
        assert!(normalize_weekday_field("Funday").is_err());
    }

    #[test]
    fn test_normalize_month_names() {
        assert_eq!(normalize_month_field("JAN-MAR").unwrap(), "1-3");
        assert_eq!(normalize_month_field("jun,Dec").unwrap(), "6,12");
        assert_eq!(normalize_month_field("*/3").unwrap(), "*/3");
        assert!(normalize_month_field("Smarch").is_err());
    }

    #[test]
    fn test_wrong_field_count() {
        assert!(CronScheduler::new("* * * *").is_err());
        assert!(CronScheduler::new("0 0 * * * *").is_err());
        assert!(CronScheduler::new("").is_err());
    }
}
