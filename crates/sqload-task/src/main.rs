use std::env;
use std::fs;
use std::io::stderr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_appender::{non_blocking, rolling::never};
use tracing_subscriber::{EnvFilter, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt};

use sqload_core::{CsvOptions, DataSourceOptions, ImportConfig, SourceRegistry, create_connection};

mod exec;
mod import;

/// 操作类型
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Exec,   // 导入 SQL 转储文件
    Import, // 导入 CSV 文件
}

/// SQL 文件导入配置
#[derive(Debug, Deserialize)]
pub struct ExecConfig {
    pub file: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub options: ImportConfig,
}

/// CSV 文件导入配置
#[derive(Debug, Deserialize)]
pub struct CsvImportConfig {
    pub file: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    pub csv: CsvOptions,
    #[serde(default)]
    pub options: ImportConfig,
}

fn default_timeout_seconds() -> u64 {
    3600
}

/// 统一的任务配置
#[derive(Debug, Deserialize)]
pub struct TaskConfig {
    pub task_id: String,
    /// 登记表中的数据源
    pub source_id: Option<String>,
    /// 内联的目标连接，优先于 source_id
    pub target: Option<DataSourceOptions>,
    pub operation: Operation,
    pub created_at: String,

    // 各操作的配置（根据 operation 字段确定使用哪一个）
    pub exec: Option<ExecConfig>,
    pub import: Option<CsvImportConfig>,
}

/// 进度输出消息（写入 stdout 的 JSON Lines）
#[derive(Debug, Serialize)]
pub struct ProgressMessage {
    kind: MessageKind,
    data: serde_json::Value,
}

/// 消息类型
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Progress,
    Status,
    Error,
    Completed,
}

/// 命令行参数
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    task_dir: Option<PathBuf>,
    /// 只推进一次后退出
    step: bool,
    /// 丢弃已保存的游标，从头开始
    restart: bool,
    unknown: Vec<String>,
}

fn parse_args(args: &[String]) -> Args {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--task-dir" => parsed.task_dir = iter.next().map(PathBuf::from),
            "--step" => parsed.step = true,
            "--restart" => parsed.restart = true,
            other => parsed.unknown.push(other.to_string()),
        }
    }
    parsed
}

/// 初始化任务日志系统
fn init_task_logging(task_dir: &Path) -> non_blocking::WorkerGuard {
    let log_file = never(task_dir, "task.log");
    let (non_blocking, guard) = non_blocking(log_file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout 只输出 JSON Lines 消息
    tracing_subscriber::registry()
        .with(filter)
        .with(layer().with_writer(stderr))
        .with(layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}

fn main() -> ExitCode {
    // 1. 解析命令行参数
    let args = parse_args(&env::args().collect::<Vec<_>>());
    let Some(task_dir) = args.task_dir.clone() else {
        print_error("fatal", "缺少 --task-dir 参数");
        eprintln!("用法: sqload-task --task-dir <DIR> [--step] [--restart]");
        return ExitCode::FAILURE;
    };

    // 2. 初始化日志系统
    let _log_guard = init_task_logging(&task_dir);
    tracing::info!("任务进程启动，task_dir: {:?}", task_dir);
    if !args.unknown.is_empty() {
        tracing::warn!("忽略未知参数: {:?}", args.unknown);
    }

    // 3. 读取任务配置
    let config_path = task_dir.join("config.json");
    let config_content = match fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) => return fatal(&format!("无法读取配置文件: {}", e)),
    };

    // 4. 解析统一的任务配置
    let config: TaskConfig = match serde_json::from_str(&config_content) {
        Ok(cfg) => cfg,
        Err(e) => return fatal(&format!("配置文件格式错误: {}", e)),
    };
    tracing::info!("任务配置解析成功: task_id={}, created_at={}", config.task_id, config.created_at);

    // 5. 组装导入作业
    let job = match config.operation {
        Operation::Exec => match &config.exec {
            Some(exec) => exec::ImportJob::from(exec),
            None => return fatal("Exec 配置缺失"),
        },
        Operation::Import => match &config.import {
            Some(import) => import::job(import),
            None => return fatal("Import 配置缺失"),
        },
    };

    // 6. 解析目标数据源并建立连接（dry-run 不连接）
    let session = if job.config.dry_run {
        tracing::info!("dry-run 模式，跳过数据库连接");
        None
    } else {
        let target = match resolve_target(&config) {
            Ok(target) => target,
            Err(e) => return fatal(&format!("无法加载数据源: {}", e)),
        };
        tracing::info!("正在连接数据库: {}", target.endpoint());
        match create_connection(&target, Duration::from_secs(job.timeout_seconds)) {
            Ok(session) => {
                tracing::info!("数据库连接成功");
                Some(session)
            }
            Err(e) => return fatal(&format!("数据库连接失败: {}", e)),
        }
    };

    let runner = exec::Runner {
        task_id: &config.task_id,
        task_dir: &task_dir,
        step: args.step,
        restart: args.restart,
    };
    runner.run(session, job)
}

/// 内联连接优先，其次从加密登记表读取
fn resolve_target(config: &TaskConfig) -> Result<DataSourceOptions, String> {
    if let Some(target) = &config.target {
        return Ok(target.clone());
    }
    let Some(source_id) = &config.source_id else {
        return Err("未指定 target 或 source_id".into());
    };

    tracing::info!("加载数据源: {}", source_id);
    let registry = SourceRegistry::init().map_err(|e| e.to_string())?;
    let source = registry.find(source_id).map_err(|e| e.to_string())?;
    Ok(source.options.clone())
}

fn fatal(message: &str) -> ExitCode {
    tracing::error!("{}", message);
    print_error("fatal", message);
    ExitCode::FAILURE
}

pub fn print_error(
    severity: &str,
    message: &str,
) {
    print_progress(ProgressMessage {
        kind: MessageKind::Error,
        data: serde_json::json!({
            "severity": severity,
            "message": message,
        }),
    });
}

pub fn print_status(message: &str) {
    print_progress(ProgressMessage {
        kind: MessageKind::Status,
        data: serde_json::json!({ "message": message }),
    });
}

pub fn print_completed(data: serde_json::Value) {
    print_progress(ProgressMessage {
        kind: MessageKind::Completed,
        data,
    });
}

pub fn print_progress(msg: ProgressMessage) {
    if let Ok(json) = serde_json::to_string(&msg) {
        println!("{}", json);
    }
}
