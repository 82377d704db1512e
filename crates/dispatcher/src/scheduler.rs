use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use scheduler_core::config::SchedulerConfig;
use scheduler_core::models::{Schedule, TriggerKind};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::coordinator::ExecutionCoordinator;
use crate::registry::TaskRegistry;

/// 调度循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
            SchedulerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// 调度循环
///
/// 每个tick刷新注册表、取出到期任务并交给执行协调器。
/// 同一任务已有执行中的实例时跳过本次触发，任务保持到期状态，下个tick再尝试。
pub struct SchedulerLoop {
    registry: Arc<TaskRegistry>,
    coordinator: Arc<ExecutionCoordinator>,
    metrics: Arc<MetricsCollector>,
    config: SchedulerConfig,
    state_tx: watch::Sender<SchedulerState>,
}

impl SchedulerLoop {
    pub fn new(
        registry: Arc<TaskRegistry>,
        coordinator: Arc<ExecutionCoordinator>,
        metrics: Arc<MetricsCollector>,
        config: SchedulerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Stopped);
        Self {
            registry,
            coordinator,
            metrics,
            config,
            state_tx,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SchedulerState) {
        let previous = self.state_tx.send_replace(state);
        debug!("调度循环状态: {} -> {}", previous, state);
    }

    /// 运行调度循环直到收到关闭信号
    ///
    /// 关闭时不再派发新的执行，等待执行中的任务最多 `drain_timeout_seconds` 秒。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        if self.state() != SchedulerState::Stopped {
            return Err(SchedulerError::Internal(format!(
                "调度循环已在运行，当前状态: {}",
                self.state()
            )));
        }
        self.set_state(SchedulerState::Running);
        info!(
            "调度循环启动，tick间隔 {} 毫秒",
            self.config.tick_interval_ms
        );

        if let Err(e) = self.coordinator.recover_interrupted().await {
            StructuredLogger::log_system_error("scheduler", "recover_interrupted", &e);
        }
        if let Err(e) = self.registry.refresh().await {
            StructuredLogger::log_system_error("scheduler", "initial_refresh", &e);
        }
        if let Err(e) = self.registry.prime_startup_tasks(Utc::now()).await {
            StructuredLogger::log_system_error("scheduler", "prime_startup_tasks", &e);
        }

        // 第一次tick立即完成
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("调度循环收到关闭信号");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }

        self.set_state(SchedulerState::Stopping);
        let in_flight = self.coordinator.in_flight_count();
        if in_flight > 0 {
            info!(
                "等待 {} 个执行结束，最多 {} 秒",
                in_flight, self.config.drain_timeout_seconds
            );
        }
        let abandoned = self.coordinator.drain(self.config.drain_timeout()).await;
        if abandoned > 0 {
            warn!("{} 个执行在关闭时被放弃", abandoned);
        }
        self.set_state(SchedulerState::Stopped);
        info!("调度循环已停止");
        Ok(())
    }

    /// 执行一次调度，返回本次派发的执行数量
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let started = Instant::now();

        if let Err(e) = self.registry.refresh().await {
            // 存储不可用时沿用上一次的缓存
            self.metrics.record_tick_error();
            StructuredLogger::log_system_error("scheduler", "refresh", &e);
        }

        let mut dispatched = 0;
        for task in self.registry.list_due(now).await {
            let trigger = match task.schedule {
                Schedule::Startup {} => TriggerKind::Startup,
                _ => TriggerKind::Scheduled,
            };

            let execution = match self.coordinator.try_acquire(&task, trigger).await {
                Ok(Some(execution)) => execution,
                Ok(None) => {
                    StructuredLogger::log_fire_skipped(task.id, &task.name, trigger);
                    continue;
                }
                Err(e) => {
                    self.metrics.record_tick_error();
                    StructuredLogger::log_system_error("scheduler", "try_acquire", &e);
                    continue;
                }
            };

            StructuredLogger::log_task_dispatched(&task, trigger, task.next_run_at);
            let task_id = task.id;
            self.coordinator.dispatch(task, execution);
            dispatched += 1;

            if let Err(e) = self.registry.mark_ran(task_id, now).await {
                self.metrics.record_tick_error();
                StructuredLogger::log_system_error("scheduler", "mark_ran", &e);
            }
        }

        self.metrics
            .record_tick_duration(started.elapsed().as_secs_f64());
        if dispatched > 0 {
            debug!("本次tick派发了 {} 个执行", dispatched);
        }
        dispatched
    }
}
