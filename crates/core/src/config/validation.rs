use crate::{SchedulerError, SchedulerResult};

/// 配置校验接口，每个配置段各自实现
pub trait ConfigValidator {
    fn validate(&self) -> SchedulerResult<()>;
}

/// 通用校验工具
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field: &str) -> SchedulerResult<()> {
        if value.trim().is_empty() {
            return Err(SchedulerError::Configuration(format!("{field} 不能为空")));
        }
        Ok(())
    }

    pub fn validate_positive(value: u64, field: &str) -> SchedulerResult<()> {
        if value == 0 {
            return Err(SchedulerError::Configuration(format!("{field} 必须大于0")));
        }
        Ok(())
    }

    pub fn validate_http_url(value: &str, field: &str) -> SchedulerResult<()> {
        if !(value.starts_with("http://") || value.starts_with("https://")) {
            return Err(SchedulerError::Configuration(format!(
                "{field} 必须是 http:// 或 https:// 地址: {value}"
            )));
        }
        Ok(())
    }

    pub fn validate_one_of(value: &str, field: &str, allowed: &[&str]) -> SchedulerResult<()> {
        if !allowed.contains(&value) {
            return Err(SchedulerError::Configuration(format!(
                "{field} 取值无效: {value}，可选: {allowed:?}"
            )));
        }
        Ok(())
    }
}
