use async_trait::async_trait;

use crate::models::NotificationPayload;
use crate::SchedulerResult;

/// 通知器
///
/// 投递失败只会被记录日志，不影响执行记录的状态。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payload: &NotificationPayload) -> SchedulerResult<()>;

    fn name(&self) -> &str;
}
