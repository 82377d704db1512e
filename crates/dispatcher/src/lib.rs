//! 调度核心：调度规则求值、任务注册表、调度循环和执行协调器

pub mod controller;
pub mod coordinator;
pub mod cron_utils;
pub mod evaluator;
pub mod registry;
pub mod scheduler;

pub use controller::TaskService;
pub use coordinator::ExecutionCoordinator;
pub use cron_utils::CronScheduler;
pub use evaluator::ScheduleEvaluator;
pub use registry::TaskRegistry;
pub use scheduler::{SchedulerLoop, SchedulerState};
