pub mod execution;
pub mod notification;
pub mod schedule;
pub mod task;

pub use execution::{Execution, ExecutionRequest, ExecutionResult, ExecutionStatus, TriggerKind};
pub use notification::{tail_chars, NotificationPayload};
pub use schedule::{IntervalConfig, Schedule, ScheduleType};
pub use task::{
    Task, TaskDefinition, DEFAULT_TIMEOUT_SECONDS, MAX_NAME_LENGTH, MAX_TIMEOUT_SECONDS,
};
