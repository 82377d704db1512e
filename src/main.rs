use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use scheduler::app::Application;
use scheduler::cli::{self, Cli, Commands};
use scheduler::shutdown::ShutdownManager;
use scheduler_core::AppConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    // 初始化日志系统，管理命令默认只输出警告
    let default_level = match cli.command {
        Commands::Run => config.observability.log_level.as_str(),
        _ => "warn",
    };
    let log_level = cli.log_level.as_deref().unwrap_or(default_level);
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(config.observability.log_format.as_str());
    init_logging(log_level, log_format)?;

    let app = Application::new(config).await?;

    match cli.command {
        Commands::Run => run_scheduler(Arc::new(app)).await,
        command => {
            let result = cli::execute(&app, command).await;
            app.close().await;
            result
        }
    }
}

/// 运行调度器直到收到关闭信号
async fn run_scheduler(app: Arc<Application>) -> Result<()> {
    info!("启动任务调度器");
    info!("数据库: {}", app.config().database.url);

    let shutdown_manager = Arc::new(ShutdownManager::new());
    let shutdown_rx = shutdown_manager.subscribe();
    let signal_handle = {
        let shutdown_manager = Arc::clone(&shutdown_manager);
        tokio::spawn(async move { shutdown_manager.listen_for_signals().await })
    };

    let result = app.run(shutdown_rx).await;
    signal_handle.abort();
    app.close().await;

    match &result {
        Ok(()) => info!("任务调度器已退出"),
        Err(e) => error!("任务调度器异常退出: {e:#}"),
    }
    result
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}
