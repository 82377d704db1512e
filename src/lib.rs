//! 单机任务调度与执行引擎
//!
//! 按配置组装各个 crate 的组件，并提供命令行入口使用的管理命令。

pub mod app;
pub mod cli;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
