//! # Scheduler Testing Utils
//!
//! Shared testing utilities for the scheduler workspace: mock executors,
//! notifiers and stores, plus builders for tasks, executions and results.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the mocks in your tests:
//!
//! ```rust
//! use scheduler_testing_utils::{MockExecutor, TaskBuilder};
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
