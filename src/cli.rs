use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use scheduler_core::models::{Execution, Schedule, Task, TaskDefinition, DEFAULT_TIMEOUT_SECONDS};
use scheduler_dispatcher::ScheduleEvaluator;
use uuid::Uuid;

use crate::app::Application;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "scheduler")]
#[command(version)]
#[command(about = "单机任务调度与执行引擎")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径，不指定时按默认路径查找
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(
        short,
        long,
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动调度器，直到收到Ctrl+C或SIGTERM
    Run,
    /// 添加任务
    Add(AddArgs),
    /// 列出任务
    List {
        /// 只列出启用的任务
        #[arg(long)]
        enabled_only: bool,
    },
    /// 启用任务
    Enable { id: Uuid },
    /// 禁用任务
    Disable { id: Uuid },
    /// 删除任务，执行历史保留
    Remove { id: Uuid },
    /// 立即执行一次任务并等待结果
    Trigger { id: Uuid },
    /// 查看执行历史
    History {
        /// 只看指定任务
        #[arg(long)]
        task: Option<Uuid>,
        /// 最多显示条数
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// 预览任务或CRON表达式接下来的触发时间
    Next {
        /// 任务ID或5字段CRON表达式
        target: String,
        /// 预览次数
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// 任务名称
    #[arg(long)]
    pub name: String,
    /// 通过shell执行的命令
    #[arg(long)]
    pub command: String,
    /// 任务描述
    #[arg(long)]
    pub description: Option<String>,
    #[command(flatten)]
    pub schedule: ScheduleArgs,
    /// 超时时间（秒）
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    pub timeout: u64,
    /// 创建后保持禁用
    #[arg(long)]
    pub disabled: bool,
    /// 成功时发送通知
    #[arg(long)]
    pub notify_success: bool,
    /// 失败时不发送通知
    #[arg(long)]
    pub no_notify_failure: bool,
}

/// 四种调度规则，必须且只能指定一种
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct ScheduleArgs {
    /// 5字段CRON表达式（UTC）
    #[arg(long)]
    pub cron: Option<String>,
    /// 固定间隔（秒）
    #[arg(long, value_name = "SECONDS")]
    pub every: Option<u64>,
    /// 一次性执行时间（RFC 3339）
    #[arg(long, value_name = "TIME")]
    pub at: Option<DateTime<Utc>>,
    /// 每次启动调度器时执行一次
    #[arg(long)]
    pub startup: bool,
}

impl ScheduleArgs {
    pub fn to_schedule(&self) -> Result<Schedule> {
        if let Some(expression) = &self.cron {
            return Ok(Schedule::cron(expression.clone()));
        }
        if let Some(seconds) = self.every {
            return Ok(Schedule::every_seconds(seconds));
        }
        if let Some(run_date) = self.at {
            return Ok(Schedule::once(run_date));
        }
        if self.startup {
            return Ok(Schedule::startup());
        }
        Err(anyhow::anyhow!("需要指定 --cron、--every、--at 或 --startup 之一"))
    }
}

impl AddArgs {
    pub fn to_definition(&self) -> Result<TaskDefinition> {
        let mut definition =
            TaskDefinition::new(&self.name, &self.command, self.schedule.to_schedule()?);
        definition.description = self.description.clone();
        definition.timeout_seconds = self.timeout;
        definition.enabled = !self.disabled;
        definition.notify_on_success = self.notify_success;
        definition.notify_on_failure = !self.no_notify_failure;
        Ok(definition)
    }
}

/// 执行管理命令（`run` 之外的子命令）
pub async fn execute(app: &Application, command: Commands) -> Result<()> {
    let service = app.service();
    match command {
        Commands::Run => return Err(anyhow::anyhow!("run 命令由主程序处理")),
        Commands::Add(args) => {
            let task = service
                .create_task(args.to_definition()?)
                .await
                .context("创建任务失败")?;
            println!("任务创建成功!");
            print_task_details(&task);
        }
        Commands::List { enabled_only } => {
            let tasks = service
                .list_tasks(enabled_only)
                .await
                .context("获取任务列表失败")?;
            print_tasks_table(&tasks);
        }
        Commands::Enable { id } => {
            let task = service.set_enabled(id, true).await.context("启用任务失败")?;
            println!("任务已启用: {} ({})", task.name, task.id);
            println!("下次执行: {}", format_time(task.next_run_at));
        }
        Commands::Disable { id } => {
            let task = service.set_enabled(id, false).await.context("禁用任务失败")?;
            println!("任务已禁用: {} ({})", task.name, task.id);
        }
        Commands::Remove { id } => {
            service.delete_task(id).await.context("删除任务失败")?;
            println!("任务删除成功: {id}");
        }
        Commands::Trigger { id } => {
            let task = service.get_task(id).await.context("获取任务失败")?;
            let execution_id = service.run_now(id).await.context("触发任务失败")?;
            println!("任务已触发: {} (执行ID {execution_id})", task.name);

            let wait = Duration::from_secs(task.timeout_seconds)
                + app.config().executor.kill_grace_period()
                + Duration::from_secs(5);
            app.coordinator().drain(wait).await;
            let execution = service
                .get_execution(execution_id)
                .await
                .context("读取执行结果失败")?;
            print_execution_details(&execution);
        }
        Commands::History { task, limit } => {
            let executions = service
                .list_executions(task, Some(limit))
                .await
                .context("获取执行历史失败")?;
            print_executions_table(&executions);
        }
        Commands::Next { target, count } => {
            let times = match target.parse::<Uuid>() {
                Ok(id) => service
                    .upcoming_runs(id, count)
                    .await
                    .context("计算触发时间失败")?,
                Err(_) => {
                    ScheduleEvaluator::upcoming(&Schedule::cron(target.as_str()), Utc::now(), count)
                        .context("无效的CRON表达式")?
                }
            };
            if times.is_empty() {
                println!("没有待触发的时间");
            }
            for (index, time) in times.iter().enumerate() {
                println!("{:>3}. {}", index + 1, time.to_rfc3339());
            }
        }
    }
    Ok(())
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_tasks_table(tasks: &[Task]) {
    println!(
        "{:<36} {:<20} {:<8} {:<24} {:<20} {:<20}",
        "ID", "名称", "状态", "调度规则", "下次执行", "上次执行"
    );
    println!("{}", "-".repeat(134));
    for task in tasks {
        println!(
            "{:<36} {:<20} {:<8} {:<24} {:<20} {:<20}",
            task.id,
            task.name,
            if task.enabled { "启用" } else { "禁用" },
            task.schedule.to_string(),
            format_time(task.next_run_at),
            format_time(task.last_run_at),
        );
    }
}

fn print_task_details(task: &Task) {
    println!("  ID: {}", task.id);
    println!("  名称: {}", task.name);
    println!("  描述: {}", task.description.as_deref().unwrap_or("N/A"));
    println!("  命令: {}", task.command);
    println!("  调度规则: {}", task.schedule);
    println!("  状态: {}", if task.enabled { "启用" } else { "禁用" });
    println!("  超时时间: {} 秒", task.timeout_seconds);
    println!("  下次执行: {}", format_time(task.next_run_at));
}

fn print_executions_table(executions: &[Execution]) {
    println!(
        "{:<36} {:<36} {:<10} {:<8} {:<20} {:>10}",
        "执行ID", "任务ID", "触发方式", "状态", "开始时间", "耗时(ms)"
    );
    println!("{}", "-".repeat(125));
    for execution in executions {
        println!(
            "{:<36} {:<36} {:<10} {:<8} {:<20} {:>10}",
            execution.id,
            execution.task_id,
            execution.trigger.as_str(),
            execution.status.as_str(),
            format_time(Some(execution.started_at)),
            execution
                .duration_ms
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

fn print_execution_details(execution: &Execution) {
    println!("执行结果:");
    println!("  状态: {}", execution.status);
    if let Some(code) = execution.exit_code {
        println!("  退出码: {code}");
    }
    if let Some(ms) = execution.duration_ms {
        println!("  耗时: {ms} 毫秒");
    }
    if let Some(message) = &execution.error_message {
        println!("  错误: {message}");
    }
    if let Some(stdout) = execution.stdout.as_deref().filter(|s| !s.is_empty()) {
        println!("  标准输出:\n{stdout}");
    }
    if let Some(stderr) = execution.stderr.as_deref().filter(|s| !s.is_empty()) {
        println!("  标准错误:\n{stderr}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_add_with_cron() {
        let cli = parse(&[
            "scheduler",
            "--config",
            "custom.toml",
            "add",
            "--name",
            "backup",
            "--command",
            "tar czf /tmp/b.tgz /data",
            "--cron",
            "0 2 * * *",
            "--notify-success",
        ]);
        assert_eq!(cli.config.as_deref(), Some("custom.toml"));
        let Commands::Add(args) = cli.command else {
            panic!("expected add command");
        };
        let definition = args.to_definition().unwrap();
        assert_eq!(definition.schedule, Schedule::cron("0 2 * * *"));
        assert!(definition.notify_on_success);
        assert!(definition.notify_on_failure);
        assert!(definition.enabled);
        assert_eq!(definition.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
    }

    #[test]
    fn test_parse_add_interval_and_once() {
        let cli = parse(&[
            "scheduler", "add", "--name", "poll", "--command", "true", "--every", "30",
            "--disabled",
        ]);
        let Commands::Add(args) = cli.command else {
            panic!("expected add command");
        };
        let definition = args.to_definition().unwrap();
        assert_eq!(definition.schedule, Schedule::every_seconds(30));
        assert!(!definition.enabled);

        let cli = parse(&[
            "scheduler",
            "add",
            "--name",
            "later",
            "--command",
            "true",
            "--at",
            "2030-01-01T08:00:00Z",
        ]);
        let Commands::Add(args) = cli.command else {
            panic!("expected add command");
        };
        assert!(matches!(
            args.to_definition().unwrap().schedule,
            Schedule::Once { .. }
        ));
    }

    #[test]
    fn test_schedule_flags_are_exclusive() {
        assert!(Cli::try_parse_from([
            "scheduler", "add", "--name", "x", "--command", "true", "--cron", "* * * * *",
            "--every", "5",
        ])
        .is_err());
        assert!(Cli::try_parse_from(["scheduler", "add", "--name", "x", "--command", "true"])
            .is_err());
    }

    #[test]
    fn test_parse_list_enabled_only() {
        let cli = parse(&["scheduler", "list", "--enabled-only"]);
        assert!(matches!(cli.command, Commands::List { enabled_only: true }));
        let cli = parse(&["scheduler", "list"]);
        assert!(matches!(cli.command, Commands::List { enabled_only: false }));
    }

    #[test]
    fn test_parse_history_and_next() {
        let cli = parse(&["scheduler", "history", "--limit", "5", "-l", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Commands::History { task: None, limit: 5 }
        ));

        let cli = parse(&["scheduler", "next", "*/5 * * * *", "-n", "3"]);
        assert!(matches!(cli.command, Commands::Next { count: 3, .. }));
        assert!(Cli::try_parse_from(["scheduler", "enable", "not-a-uuid"]).is_err());
    }
}
