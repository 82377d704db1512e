//! Observability module
//!
//! This module provides:
//! - Metrics collection via the `metrics` facade (exported by Prometheus in the binary)
//! - Structured logging helpers for scheduler events

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
