use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use sqload_core::{
    AdvanceResult, CursorStore, DatabaseSession, FileCursorStore, ImportConfig, ImportCursor, SessionExecutor,
    Statistics, cursors_dir,
    import::{FailureRecord, RecordedParseError},
};

use crate::{ExecConfig, MessageKind, ProgressMessage, print_completed, print_error, print_progress, print_status};

/// 进度超过该比例后冻结展示总量
const FREEZE_THRESHOLD: f64 = 0.05;
const DISPLAY_FILE: &str = "display.json";

/// 一次导入作业
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub file: PathBuf,
    pub timeout_seconds: u64,
    pub config: ImportConfig,
}

impl From<&ExecConfig> for ImportJob {
    fn from(exec: &ExecConfig) -> Self {
        Self {
            file: PathBuf::from(&exec.file),
            timeout_seconds: exec.timeout_seconds,
            config: exec.options.clone(),
        }
    }
}

/// 展示用的总行数/语句数估算
///
/// 导入初期估算波动较大，进度超过 5% 后锁定，避免界面上的总量来回跳动。
/// 分步模式下每次调用都是新进程，因此保存在任务目录中。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayTotals {
    pub lines: Option<u64>,
    pub queries: Option<u64>,
    pub frozen: bool,
}

impl DisplayTotals {
    fn load(task_dir: &Path) -> Self {
        let path = task_dir.join(DISPLAY_FILE);
        let Ok(content) = fs::read(&path) else {
            return Self::default();
        };
        serde_json::from_slice(&content).unwrap_or_else(|e| {
            tracing::warn!("展示总量文件损坏，重新估算: {}", e);
            Self::default()
        })
    }

    fn save(
        &self,
        task_dir: &Path,
    ) {
        let result = serde_json::to_vec(self)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(task_dir.join(DISPLAY_FILE), json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!("保存展示总量失败: {}", e);
        }
    }

    fn update(
        &mut self,
        progress: Option<f64>,
        lines: u64,
        queries: u64,
    ) {
        if self.frozen {
            return;
        }
        let Some(progress) = progress.filter(|p| *p > 0.0) else {
            return;
        };
        self.lines = Some((lines as f64 / progress).round() as u64);
        self.queries = Some((queries as f64 / progress).round() as u64);
        if progress >= FREEZE_THRESHOLD {
            tracing::debug!("展示总量已冻结: lines={:?}, queries={:?}", self.lines, self.queries);
            self.frozen = true;
        }
    }
}

#[derive(Debug)]
pub enum TaskError {
    Fatal(String),
    Import(FailureRecord),
}

/// 驱动一次导入任务：循环推进或只推进一步
pub struct Runner<'a> {
    pub task_id: &'a str,
    pub task_dir: &'a Path,
    pub step: bool,
    pub restart: bool,
}

impl Runner<'_> {
    pub fn run(
        &self,
        session: Option<Box<dyn DatabaseSession>>,
        job: ImportJob,
    ) -> ExitCode {
        match self.drive(session, job) {
            Ok(()) => ExitCode::SUCCESS,
            Err(TaskError::Fatal(message)) => {
                tracing::error!("{}", message);
                print_error("fatal", &message);
                ExitCode::FAILURE
            }
            Err(TaskError::Import(failure)) => {
                tracing::error!("导入失败: {}", failure.message);
                if let Some(remediation) = &failure.remediation {
                    tracing::info!("可执行以下语句后重新开始: {}", remediation);
                }
                print_progress(ProgressMessage {
                    kind: MessageKind::Error,
                    data: serde_json::json!({
                        "severity": "import",
                        "message": failure.message,
                        "failure": failure,
                    }),
                });
                ExitCode::FAILURE
            }
        }
    }

    pub(crate) fn drive(
        &self,
        session: Option<Box<dyn DatabaseSession>>,
        job: ImportJob,
    ) -> Result<(), TaskError> {
        tracing::info!("准备导入文件: {:?}", job.file);
        let mut executor = match session {
            Some(session) => SessionExecutor::new(job.config.clone(), session),
            None => SessionExecutor::dry_run(job.config.clone()),
        }
        .map_err(|e| TaskError::Fatal(format!("导入配置无效: {}", e)))?;

        let mut store = FileCursorStore::new(cursors_dir(self.task_dir));
        let mut display = if self.restart {
            store
                .remove(self.task_id)
                .map_err(|e| TaskError::Fatal(format!("删除游标失败: {}", e)))?;
            print_status("已丢弃保存的游标，从头开始导入");
            DisplayTotals::default()
        } else {
            DisplayTotals::load(self.task_dir)
        };

        let mut cursor = self.load_cursor(&mut store, &job, executor.config())?;
        let started = Instant::now();
        let mut parse_errors: Vec<RecordedParseError> = vec![];

        loop {
            let AdvanceResult {
                cursor: next,
                statistics,
                finished,
                error,
            } = executor.advance(&cursor, None);
            cursor = next;
            store
                .put(self.task_id, &cursor)
                .map_err(|e| TaskError::Fatal(format!("保存游标失败: {}", e)))?;

            if let Some(err) = error {
                let failure = cursor.failure.clone().unwrap_or_else(|| FailureRecord::from(&err));
                return Err(TaskError::Import(failure));
            }
            parse_errors.extend(statistics.parse_errors.iter().cloned());

            display.update(cursor.progress(), statistics.cumulative_lines, statistics.cumulative_queries);
            display.save(self.task_dir);

            if finished {
                let elapsed = started.elapsed().as_secs_f64();
                tracing::info!(
                    "导入完成，共 {} 行，{} 条语句，耗时 {:.1} 秒",
                    statistics.cumulative_lines,
                    statistics.cumulative_queries,
                    elapsed
                );
                print_completed(serde_json::json!({
                    "status": "success",
                    "file": job.file,
                    "total_lines": statistics.cumulative_lines,
                    "total_queries": statistics.cumulative_queries,
                    "executed": statistics.cumulative_executed,
                    "bytes": statistics.cumulative_bytes,
                    "parse_errors": parse_errors,
                    "elapsed_seconds": format!("{:.1}", elapsed),
                    "finished_at": Utc::now().to_rfc3339(),
                }));
                return Ok(());
            }

            print_progress(progress_message(&cursor, &statistics, &display));
            if self.step {
                return Ok(());
            }
        }
    }

    /// 读取已保存的游标，不存在时为文件创建新游标
    fn load_cursor(
        &self,
        store: &mut FileCursorStore,
        job: &ImportJob,
        config: &ImportConfig,
    ) -> Result<ImportCursor, TaskError> {
        let saved = store
            .get(self.task_id)
            .map_err(|e| TaskError::Fatal(format!("读取游标失败: {}", e)))?;
        if let Some(cursor) = saved {
            if cursor.file.path != job.file {
                tracing::warn!("游标对应的文件 {:?} 与配置 {:?} 不一致", cursor.file.path, job.file);
            }
            tracing::info!("从第 {} 行继续导入 (offset {})", cursor.line_number, cursor.byte_offset);
            return Ok(cursor);
        }

        let cursor = ImportCursor::start(&job.file, config).map_err(|e| TaskError::Fatal(format!("无法打开文件: {}", e)))?;
        store
            .put(self.task_id, &cursor)
            .map_err(|e| TaskError::Fatal(format!("保存游标失败: {}", e)))?;
        tracing::info!("新建导入: {} ({})", cursor.import_id, cursor.file.encoding.label());
        Ok(cursor)
    }
}

fn progress_message(
    cursor: &ImportCursor,
    statistics: &Statistics,
    display: &DisplayTotals,
) -> ProgressMessage {
    let percentage = cursor.progress().unwrap_or_default() * 100.0;
    let seconds = statistics.elapsed_ms as f64 / 1000.0;
    let speed = if seconds > 0.0 {
        statistics.lines_this_invocation as f64 / seconds
    } else {
        0.0
    };

    ProgressMessage {
        kind: MessageKind::Progress,
        data: serde_json::json!({
            "lines": statistics.lines_this_invocation,
            "queries": statistics.queries_this_invocation,
            "bytes": statistics.bytes_this_invocation,
            "total_lines": statistics.cumulative_lines,
            "total_queries": statistics.cumulative_queries,
            "total_bytes": statistics.cumulative_bytes,
            "estimated_lines": display.lines,
            "estimated_queries": display.queries,
            "line_number": cursor.line_number,
            "budget_lines": cursor.budget_lines,
            "percentage": format!("{:.1}", percentage),
            "speed": format!("{:.0}", speed),
            "elapsed_seconds": format!("{:.1}", seconds),
        }),
    }
}
