use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use scheduler_core::AppConfig;
use scheduler_dispatcher::{
    ExecutionCoordinator, SchedulerLoop, SchedulerState, TaskRegistry, TaskService,
};
use scheduler_infrastructure::{CompositeNotifier, DatabaseManager, MetricsCollector};
use scheduler_worker::ShellExecutor;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 主应用程序
///
/// 按配置组装存储、执行器、通知器、执行协调器、任务注册表和调度循环。
/// CLI 的管理命令只使用 [`Application::service`]，`run` 命令再启动调度循环。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    coordinator: Arc<ExecutionCoordinator>,
    scheduler: Arc<SchedulerLoop>,
    service: TaskService,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("打开数据库失败: {}", config.database.url))?;
        Self::with_database(config, database)
    }

    /// 使用已经打开的存储创建应用实例
    pub fn with_database(config: AppConfig, database: DatabaseManager) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new());
        let executor = Arc::new(ShellExecutor::new(config.executor.clone()));
        let notifier = CompositeNotifier::from_config(&config.notification)
            .context("创建通知器失败")?;

        let mut coordinator = ExecutionCoordinator::new(
            executor,
            database.execution_store.clone(),
            metrics.clone(),
        )
        .with_excerpt_chars(config.notification.excerpt_chars);
        if !notifier.is_empty() {
            info!("已启用 {} 个通知器", notifier.len());
            coordinator = coordinator.with_notifier(Arc::new(notifier));
        }
        let coordinator = Arc::new(coordinator);

        let registry = Arc::new(TaskRegistry::new(database.task_store.clone()));
        let scheduler = Arc::new(SchedulerLoop::new(
            registry.clone(),
            coordinator.clone(),
            metrics,
            config.scheduler.clone(),
        ));
        let service = TaskService::new(
            registry,
            coordinator.clone(),
            database.execution_store.clone(),
        );

        Ok(Self {
            config,
            database,
            coordinator,
            scheduler,
            service,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> &TaskService {
        &self.service
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// 运行调度循环直到收到关闭信号，返回前等待执行中的任务
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.database
            .health_check()
            .await
            .context("数据库健康检查失败")?;
        if self.config.observability.metrics_enabled {
            install_metrics_exporter(&self.config.observability.metrics_listen)?;
        }

        self.scheduler
            .run(shutdown_rx)
            .await
            .context("调度循环运行失败")?;
        Ok(())
    }

    /// 关闭数据库连接
    pub async fn close(&self) {
        if self.coordinator.in_flight_count() > 0 {
            warn!(
                "仍有 {} 个执行未结束，关闭数据库连接",
                self.coordinator.in_flight_count()
            );
        }
        self.database.close().await;
    }
}

/// 启动Prometheus指标端点
fn install_metrics_exporter(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus指标导出器失败")?;
    info!("Prometheus指标端点: http://{addr}/metrics");
    Ok(())
}
