//! 单次有界调用：恢复状态，读行、切分、合并、执行，直到预算用尽或流结束。
//!
//! 输入游标不会被修改，每次调用返回新的游标。

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::DatabaseSession;

use super::{
    analysis::FileAnalysis,
    batch::{InsertBatcher, target_object},
    config::{ConfigError, ImportConfig},
    csv_line::CsvLineConverter,
    cursor::{ImportCursor, ImportPhase},
    error::{ExecutionError, FailureKind, FailureRecord, ImportError, ParseError},
    parser::{SqlParser, Statement},
    stream::ByteStream,
    tuner::{AutoTuner, CachedProbe, MemoryProbe, ProcProbe, TuningSample, push_sample},
};

/// dry-run 模式最多记录的解析错误数
const PARSE_ERROR_LIMIT: usize = 100;
/// 采样进程内存的间隔行数
const RSS_SAMPLE_LINES: u64 = 1000;

/// 单次调用的上限，None 表示不限制
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Budget {
    pub max_lines: Option<u64>,
    pub max_bytes: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl Budget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn lines(max_lines: u64) -> Self {
        Self {
            max_lines: Some(max_lines),
            ..Self::default()
        }
    }

    pub fn with_duration(
        mut self,
        max_duration: Duration,
    ) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    fn exhausted(
        &self,
        lines: u64,
        bytes: u64,
        started: Instant,
    ) -> bool {
        self.max_lines.is_some_and(|max| lines >= max)
            || self.max_bytes.is_some_and(|max| bytes >= max)
            || self.max_duration.is_some_and(|max| started.elapsed() >= max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedParseError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub lines_this_invocation: u64,
    pub queries_this_invocation: u64,
    pub bytes_this_invocation: u64,
    pub executed_this_invocation: u64,
    pub cumulative_lines: u64,
    pub cumulative_queries: u64,
    pub cumulative_bytes: u64,
    pub cumulative_executed: u64,
    pub elapsed_ms: u64,
    /// 仅 dry-run 模式记录
    pub parse_errors: Vec<RecordedParseError>,
}

impl Statistics {
    fn sync_cumulative(
        &mut self,
        cursor: &ImportCursor,
    ) {
        self.cumulative_lines = cursor.line_number;
        self.cumulative_queries = cursor.query_count;
        self.cumulative_bytes = cursor.byte_offset;
        self.cumulative_executed = cursor.executed_count;
    }
}

#[derive(Debug)]
pub struct AdvanceResult {
    pub cursor: ImportCursor,
    pub statistics: Statistics,
    pub finished: bool,
    pub error: Option<ImportError>,
}

pub struct SessionExecutor {
    config: ImportConfig,
    session: Option<Box<dyn DatabaseSession>>,
    tuner: AutoTuner,
    csv: Option<CsvLineConverter>,
}

impl SessionExecutor {
    pub fn new(
        config: ImportConfig,
        session: Box<dyn DatabaseSession>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, Some(session))
    }

    /// 只解析不执行
    pub fn dry_run(mut config: ImportConfig) -> Result<Self, ConfigError> {
        config.dry_run = true;
        Self::build(config, None)
    }

    fn build(
        config: ImportConfig,
        session: Option<Box<dyn DatabaseSession>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tuner = AutoTuner::new(&config, Box::new(CachedProbe::new(ProcProbe)));
        let csv = config.csv.as_ref().map(CsvLineConverter::new);
        Ok(Self {
            config,
            session,
            tuner,
            csv,
        })
    }

    /// 替换内存探针
    pub fn with_probe(
        mut self,
        probe: Box<dyn MemoryProbe>,
    ) -> Self {
        self.tuner = AutoTuner::new(&self.config, probe);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    fn is_dry_run(&self) -> bool {
        self.config.dry_run || self.session.is_none()
    }

    /// 推进一次导入；budget 为 None 时由自动调优决定
    pub fn advance(
        &mut self,
        cursor: &ImportCursor,
        budget: Option<Budget>,
    ) -> AdvanceResult {
        let mut cursor = cursor.clone();
        let mut statistics = Statistics::default();

        match cursor.phase {
            ImportPhase::Finished => {
                tracing::debug!("导入已完成，跳过: {}", cursor.import_id);
                statistics.sync_cumulative(&cursor);
                return AdvanceResult {
                    cursor,
                    statistics,
                    finished: true,
                    error: None,
                };
            }
            ImportPhase::Failed => {
                let record = cursor.failure.clone().unwrap_or_else(|| FailureRecord {
                    kind: FailureKind::Stream,
                    message: "导入已失败".into(),
                    line: None,
                    statement: None,
                    object: None,
                    conflict: false,
                    remediation: None,
                });
                statistics.sync_cumulative(&cursor);
                return AdvanceResult {
                    cursor,
                    statistics,
                    finished: false,
                    error: Some(ImportError::AlreadyFailed(record)),
                };
            }
            ImportPhase::Fresh | ImportPhase::Running => {}
        }

        let started = Instant::now();
        let outcome = self.run(&mut cursor, budget, &mut statistics, started);
        statistics.elapsed_ms = started.elapsed().as_millis() as u64;
        statistics.sync_cumulative(&cursor);

        match outcome {
            Ok(()) => {
                let finished = cursor.is_finished();
                tracing::info!(
                    "本次处理 {} 行, {} 条语句, 偏移 {}{}",
                    statistics.lines_this_invocation,
                    statistics.queries_this_invocation,
                    cursor.byte_offset,
                    if finished { ", 导入完成" } else { "" }
                );
                AdvanceResult {
                    cursor,
                    statistics,
                    finished,
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!("导入失败: {}", err);
                cursor.phase = ImportPhase::Failed;
                cursor.failure = Some(FailureRecord::from(&err));
                AdvanceResult {
                    cursor,
                    statistics,
                    finished: false,
                    error: Some(err),
                }
            }
        }
    }

    fn run(
        &mut self,
        cursor: &mut ImportCursor,
        budget: Option<Budget>,
        statistics: &mut Statistics,
        started: Instant,
    ) -> Result<(), ImportError> {
        cursor.file.verify()?;
        let mut stream = ByteStream::open(&cursor.file.path, cursor.file.encoding, self.config.buffer_size)?;

        if cursor.analysis.is_none() {
            cursor.analysis = Some(FileAnalysis::sample(&mut stream)?);
        }
        if cursor.phase == ImportPhase::Fresh {
            tracing::info!("开始导入: {:?} ({})", cursor.file.path, cursor.file.encoding.label());
            if !self.is_dry_run() && !cursor.pre_statements_done {
                for sql in self.pre_statements() {
                    self.execute(&sql, 0, cursor, statistics)?;
                }
            }
            cursor.pre_statements_done = true;
            cursor.phase = ImportPhase::Running;
        }

        let budget = match budget {
            Some(budget) => budget,
            None => self.tuned_budget(cursor),
        };
        tracing::debug!("本次预算: {:?}", budget);

        let offset = stream.seek(cursor.byte_offset)?;
        if offset != cursor.byte_offset {
            tracing::warn!("偏移 {} 超出文件末尾，实际定位到 {}", cursor.byte_offset, offset);
            cursor.byte_offset = offset;
        }

        let mut parser = SqlParser::with_state(&self.config, cursor.parser.clone());
        let mut batcher = InsertBatcher::new(
            cursor.batch.clone(),
            self.config.insert_batch_row_limit,
            self.config.insert_batch_byte_limit,
            &self.config.string_quote_chars,
        );

        let mut peak_rss = self.tuner.process_rss();
        let mut warned_utf8 = false;
        let mut eof = false;

        while !budget.exhausted(statistics.lines_this_invocation, statistics.bytes_this_invocation, started) {
            let Some(raw) = stream.read_line()? else {
                eof = true;
                break;
            };
            cursor.line_number += 1;
            statistics.lines_this_invocation += 1;
            statistics.bytes_this_invocation += raw.len() as u64;
            let line_number = cursor.line_number;

            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(err) => {
                    if !warned_utf8 {
                        tracing::warn!("第 {} 行不是有效的 UTF-8，按替换字符处理", line_number);
                        warned_utf8 = true;
                    }
                    String::from_utf8_lossy(err.as_bytes()).into_owned()
                }
            };

            let mut parse_failure = None;
            if self.csv.is_some() {
                let header = line_number == 1 && self.config.csv.as_ref().is_some_and(|csv| csv.skip_header);
                let converted = match &self.csv {
                    Some(csv) if !header => csv.convert(&line),
                    _ => Ok(None),
                };
                match converted {
                    Ok(Some(text)) => {
                        let statement = Statement {
                            text,
                            delimiter: ";".into(),
                        };
                        self.handle(&statement, &mut batcher, cursor, statistics)?;
                    }
                    Ok(None) => {}
                    Err(err) => parse_failure = Some(err),
                }
            } else {
                for item in parser.feed(&line) {
                    match item {
                        Ok(statement) => self.handle(&statement, &mut batcher, cursor, statistics)?,
                        Err(err) => parse_failure = Some(err),
                    }
                }
            }
            if let Some(err) = parse_failure {
                self.parse_error(line_number, err, statistics)?;
                parser.reset();
            }

            cursor.byte_offset = stream.tell();

            if line_number % RSS_SAMPLE_LINES == 0 {
                peak_rss = peak_rss.max(self.tuner.process_rss());
            }
        }
        if !eof {
            eof = stream.eof()?;
        }

        if eof {
            if let Err(err) = parser.finish() {
                self.parse_error(cursor.line_number, err, statistics)?;
                parser.reset();
            }
            if let Some(sql) = batcher.flush_pending()? {
                self.execute(&sql, cursor.line_number, cursor, statistics)?;
            }
            if !self.is_dry_run() {
                for sql in self.config.post_statements.clone() {
                    self.execute(&sql, cursor.line_number, cursor, statistics)?;
                }
            }
            cursor.phase = ImportPhase::Finished;
        }

        cursor.parser = parser.into_state();
        cursor.batch = batcher.into_state();

        peak_rss = peak_rss.max(self.tuner.process_rss());
        push_sample(
            &mut cursor.history,
            TuningSample {
                budget_lines: budget.max_lines.unwrap_or_default(),
                lines: statistics.lines_this_invocation,
                bytes: statistics.bytes_this_invocation,
                elapsed_ms: started.elapsed().as_millis() as u64,
                peak_rss,
            },
        );
        Ok(())
    }

    fn tuned_budget(
        &mut self,
        cursor: &mut ImportCursor,
    ) -> Budget {
        let mut budget = match &cursor.analysis {
            Some(analysis) => {
                let tuned = self.tuner.next_budget(analysis, cursor.budget_lines, &cursor.history);
                cursor.budget_lines = Some(tuned.lines);
                Budget {
                    max_lines: Some(tuned.lines),
                    max_bytes: Some(tuned.bytes),
                    max_duration: None,
                }
            }
            None => Budget::unbounded(),
        };
        if let Some(limit) = self.config.invocation_time_limit_ms {
            budget = budget.with_duration(Duration::from_millis(limit));
        }
        budget
    }

    fn pre_statements(&self) -> Vec<String> {
        let mut statements = vec![];
        if let Some(csv) = &self.config.csv {
            if csv.pre_empty {
                statements.push(format!("DELETE FROM {}", csv.table.trim()));
            }
        }
        statements.extend(self.config.pre_statements.iter().cloned());
        statements
    }

    fn handle(
        &mut self,
        statement: &Statement,
        batcher: &mut InsertBatcher,
        cursor: &mut ImportCursor,
        statistics: &mut Statistics,
    ) -> Result<(), ImportError> {
        cursor.query_count += 1;
        statistics.queries_this_invocation += 1;
        for sql in batcher.accumulate(statement)? {
            self.execute(&sql, cursor.line_number, cursor, statistics)?;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        sql: &str,
        line: u64,
        cursor: &mut ImportCursor,
        statistics: &mut Statistics,
    ) -> Result<(), ImportError> {
        if self.config.dry_run {
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        tracing::trace!("执行: {}", sql);
        session.exec(sql).map_err(|err| {
            ExecutionError::new(line, sql, target_object(sql), err.to_string(), err.is_conflict())
        })?;
        cursor.executed_count += 1;
        statistics.executed_this_invocation += 1;
        Ok(())
    }

    /// dry-run 模式记录后继续，否则终止导入
    fn parse_error(
        &self,
        line: u64,
        err: ParseError,
        statistics: &mut Statistics,
    ) -> Result<(), ImportError> {
        if !self.is_dry_run() {
            return Err(ImportError::Parse { line, source: err });
        }
        tracing::warn!("第 {} 行解析错误: {}", line, err);
        if statistics.parse_errors.len() < PARSE_ERROR_LIMIT {
            statistics.parse_errors.push(RecordedParseError {
                line,
                message: err.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::{Arc, Mutex},
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{DataSourceKind, DriverError, ExecResp, import::tuner::FixedProbe};

    /// 记录收到的 SQL，可以指定在第 n 条时失败
    #[derive(Clone, Default)]
    struct Recorder {
        executed: Arc<Mutex<Vec<String>>>,
        fail_on: Option<(usize, &'static str)>,
    }

    impl DatabaseSession for Recorder {
        fn kind(&self) -> DataSourceKind {
            DataSourceKind::SQLite
        }

        fn exec(
            &mut self,
            sql: &str,
        ) -> Result<ExecResp, DriverError> {
            let mut executed = self.executed.lock().unwrap();
            if let Some((n, message)) = self.fail_on {
                if executed.len() == n {
                    return Err(DriverError::Exec(message.into()));
                }
            }
            executed.push(sql.to_string());
            Ok(ExecResp { affected: 1 })
        }
    }

    fn executor(
        config: ImportConfig,
        recorder: &Recorder,
    ) -> SessionExecutor {
        SessionExecutor::new(config, Box::new(recorder.clone()))
            .unwrap()
            .with_probe(Box::new(FixedProbe::default()))
    }

    fn dump(content: &str) -> (tempfile::TempDir, ImportCursor) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");
        fs::write(&path, content).unwrap();
        let cursor = ImportCursor::start(&path, &ImportConfig::default()).unwrap();
        (dir, cursor)
    }

    #[test]
    fn consecutive_inserts_are_executed_as_one_batch() {
        let (_dir, cursor) = dump("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n");
        let recorder = Recorder::default();
        let result = executor(ImportConfig::default(), &recorder).advance(&cursor, Some(Budget::unbounded()));

        assert!(result.error.is_none());
        assert!(result.finished);
        assert_eq!(*recorder.executed.lock().unwrap(), vec!["INSERT INTO t VALUES (1), (2);"]);
        assert_eq!(result.statistics.queries_this_invocation, 2);
        assert_eq!(result.statistics.executed_this_invocation, 1);
        assert_eq!(result.statistics.cumulative_bytes, 52);
    }

    #[test]
    fn input_cursor_is_not_modified() {
        let (_dir, cursor) = dump("SELECT 1;\n");
        let before = cursor.clone();
        let recorder = Recorder::default();
        let result = executor(ImportConfig::default(), &recorder).advance(&cursor, None);
        assert_eq!(cursor, before);
        assert!(result.finished);
        assert_eq!(result.cursor.phase, ImportPhase::Finished);
    }

    #[test]
    fn finished_cursor_is_a_no_op() {
        let (dir, cursor) = dump("SELECT 1;\n");
        let recorder = Recorder::default();
        let mut executor = executor(ImportConfig::default(), &recorder);
        let first = executor.advance(&cursor, None);
        assert!(first.finished);

        // 文件删除后也不会重新读取
        fs::remove_file(dir.path().join("dump.sql")).unwrap();
        let second = executor.advance(&first.cursor, None);
        assert!(second.finished);
        assert!(second.error.is_none());
        assert_eq!(second.cursor, first.cursor);
        assert_eq!(second.statistics.lines_this_invocation, 0);
        assert_eq!(recorder.executed.lock().unwrap().len(), 1);
    }

    #[test]
    fn multi_line_statement_split_by_budget_runs_once() {
        let (_dir, cursor) = dump("CREATE TABLE t (\n  id INT,\n  name TEXT\n);\nSELECT 1;\n");
        let recorder = Recorder::default();
        let mut executor = executor(ImportConfig::default(), &recorder);

        let first = executor.advance(&cursor, Some(Budget::lines(2)));
        assert!(!first.finished);
        assert!(first.cursor.parser.has_pending());
        assert!(recorder.executed.lock().unwrap().is_empty());

        let second = executor.advance(&first.cursor, Some(Budget::lines(10)));
        assert!(second.finished);
        assert_eq!(
            *recorder.executed.lock().unwrap(),
            vec!["CREATE TABLE t (\n  id INT,\n  name TEXT\n);", "SELECT 1;"]
        );
        assert_eq!(second.statistics.cumulative_lines, 5);
    }

    #[test]
    fn open_batch_is_kept_until_end_of_stream() {
        let (_dir, cursor) = dump("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\nINSERT INTO t VALUES (3);\n");
        let recorder = Recorder::default();
        let mut executor = executor(ImportConfig::default(), &recorder);

        let first = executor.advance(&cursor, Some(Budget::lines(2)));
        assert_eq!(first.cursor.batch.rows(), 2);
        assert!(recorder.executed.lock().unwrap().is_empty());

        let second = executor.advance(&first.cursor, Some(Budget::lines(2)));
        assert!(second.finished);
        assert_eq!(
            *recorder.executed.lock().unwrap(),
            vec!["INSERT INTO t VALUES (1), (2), (3);"]
        );
    }

    #[test]
    fn execution_failure_is_structured_and_terminal() {
        let (_dir, cursor) = dump("CREATE TABLE t (id INT);\nCREATE TABLE u (id INT);\n");
        let recorder = Recorder {
            fail_on: Some((1, "table u already exists")),
            ..Recorder::default()
        };
        let mut executor = executor(ImportConfig::default(), &recorder);

        let result = executor.advance(&cursor, None);
        assert!(!result.finished);
        assert_eq!(result.cursor.phase, ImportPhase::Failed);
        let Some(ImportError::Execution(err)) = &result.error else {
            panic!("unexpected result: {:?}", result.error);
        };
        assert_eq!(err.line, 2);
        assert_eq!(err.object.as_deref(), Some("u"));
        assert!(err.conflict);
        assert_eq!(err.remediation().as_deref(), Some("DROP TABLE IF EXISTS u;"));

        let failure = result.cursor.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::Execution);

        // 失败后不会自动重试
        let again = executor.advance(&result.cursor, None);
        assert!(matches!(again.error, Some(ImportError::AlreadyFailed(record)) if record == failure));
        assert_eq!(recorder.executed.lock().unwrap().len(), 1);
    }

    #[test]
    fn pre_and_post_statements_run_once() {
        let (_dir, cursor) = dump("SELECT 1;\nSELECT 2;\n");
        let config = ImportConfig {
            pre_statements: vec!["SET FOREIGN_KEY_CHECKS = 0".into()],
            post_statements: vec!["SET FOREIGN_KEY_CHECKS = 1".into()],
            ..ImportConfig::default()
        };
        let recorder = Recorder::default();
        let mut executor = executor(config, &recorder);

        let first = executor.advance(&cursor, Some(Budget::lines(1)));
        let second = executor.advance(&first.cursor, Some(Budget::lines(1)));
        let third = executor.advance(&second.cursor, Some(Budget::lines(1)));
        assert!(third.finished);
        assert_eq!(
            *recorder.executed.lock().unwrap(),
            vec![
                "SET FOREIGN_KEY_CHECKS = 0",
                "SELECT 1;",
                "SELECT 2;",
                "SET FOREIGN_KEY_CHECKS = 1"
            ]
        );
    }

    #[test]
    fn unterminated_final_statement_fails() {
        let (_dir, cursor) = dump("SELECT 1;\nSELECT 'oops\n");
        let recorder = Recorder::default();
        let result = executor(ImportConfig::default(), &recorder).advance(&cursor, None);
        assert!(matches!(
            result.error,
            Some(ImportError::Parse {
                line: 2,
                source: ParseError::Unterminated { inside_string: true }
            })
        ));
    }

    #[test]
    fn dry_run_records_errors_and_continues() {
        let (_dir, cursor) = dump("SELECT 1;\nSELECT\n2\n3;\nSELECT 4;\nSELECT 'x\n");
        let config = ImportConfig {
            max_statement_lines: 2,
            ..ImportConfig::default()
        };
        let mut executor = SessionExecutor::dry_run(config)
            .unwrap()
            .with_probe(Box::new(FixedProbe::default()));
        let result = executor.advance(&cursor, None);

        assert!(result.error.is_none());
        assert!(result.finished);
        let lines: Vec<u64> = result.statistics.parse_errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![4, 6]);
        assert_eq!(result.statistics.executed_this_invocation, 0);
    }

    #[test]
    fn changed_file_fails_identity_check() {
        let (dir, cursor) = dump("SELECT 1;\nSELECT 2;\n");
        let recorder = Recorder::default();
        let mut executor = executor(ImportConfig::default(), &recorder);
        let first = executor.advance(&cursor, Some(Budget::lines(1)));

        fs::write(dir.path().join("dump.sql"), "SELECT 1;\nSELECT 2;\nSELECT 3;\n").unwrap();
        let second = executor.advance(&first.cursor, None);
        assert!(matches!(
            second.error,
            Some(ImportError::Stream(crate::import::error::StreamError::IdentityMismatch { .. }))
        ));
    }

    #[test]
    fn csv_lines_become_batched_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        fs::write(&path, "id,name\n1,alice\n2,\"bob, jr\"\n").unwrap();

        let config = ImportConfig {
            csv: Some(crate::CsvOptions {
                table: "users".into(),
                skip_header: true,
                pre_empty: true,
                ..crate::CsvOptions::default()
            }),
            ..ImportConfig::default()
        };
        let cursor = ImportCursor::start(&path, &config).unwrap();
        let recorder = Recorder::default();
        let result = executor(config, &recorder).advance(&cursor, None);

        assert!(result.finished, "{:?}", result.error);
        assert_eq!(
            *recorder.executed.lock().unwrap(),
            vec![
                "DELETE FROM users",
                "INSERT INTO users VALUES ('1', 'alice'), ('2', 'bob, jr');"
            ]
        );
    }

    #[test]
    fn history_records_each_invocation() {
        let (_dir, cursor) = dump("SELECT 1;\nSELECT 2;\nSELECT 3;\n");
        let recorder = Recorder::default();
        let mut executor = executor(ImportConfig::default(), &recorder);

        let first = executor.advance(&cursor, None);
        assert_eq!(first.cursor.budget_lines, Some(3000));
        assert_eq!(first.cursor.history.len(), 1);
        assert_eq!(first.cursor.history[0].lines, 3);
    }

    #[test]
    fn byte_budget_stops_on_line_boundary_and_resumes_exactly() {
        let content: String = (1..=8).map(|i| format!("SELECT {i};\n")).collect();
        let (_dir, cursor) = dump(&content);
        let recorder = Recorder::default();
        let mut executor = executor(ImportConfig::default(), &recorder);
        let budget = Budget {
            max_bytes: Some(25),
            ..Budget::default()
        };

        let first = executor.advance(&cursor, Some(budget));
        assert!(!first.finished);
        assert_eq!(first.statistics.lines_this_invocation, 3);
        assert_eq!(first.statistics.bytes_this_invocation, 30);
        assert_eq!(first.cursor.byte_offset, 30);

        let mut result = first;
        while !result.finished {
            result = executor.advance(&result.cursor, Some(budget));
            assert!(result.error.is_none(), "{:?}", result.error);
        }
        let expected: Vec<String> = (1..=8).map(|i| format!("SELECT {i};")).collect();
        assert_eq!(*recorder.executed.lock().unwrap(), expected);
        assert_eq!(result.statistics.cumulative_lines, 8);
    }

    #[test]
    fn exhausted_time_budget_reads_nothing() {
        let (_dir, cursor) = dump("SELECT 1;\nSELECT 2;\n");
        let recorder = Recorder::default();
        let mut executor = executor(ImportConfig::default(), &recorder);

        let first = executor.advance(&cursor, Some(Budget::unbounded().with_duration(Duration::ZERO)));
        assert!(first.error.is_none());
        assert!(!first.finished);
        assert_eq!(first.cursor.phase, ImportPhase::Running);
        assert_eq!(first.cursor.byte_offset, 0);
        assert_eq!(first.statistics.lines_this_invocation, 0);
        assert!(recorder.executed.lock().unwrap().is_empty());

        let second = executor.advance(&first.cursor, Some(Budget::unbounded()));
        assert!(second.finished);
        assert_eq!(*recorder.executed.lock().unwrap(), vec!["SELECT 1;", "SELECT 2;"]);
    }

    #[test]
    fn configured_time_limit_bounds_tuned_budget() {
        let (_dir, cursor) = dump("SELECT 1;\n");
        let config = ImportConfig {
            invocation_time_limit_ms: Some(250),
            ..ImportConfig::default()
        };
        let recorder = Recorder::default();
        let mut executor = executor(config, &recorder);

        let mut fresh = cursor.clone();
        assert_eq!(
            executor.tuned_budget(&mut fresh),
            Budget::unbounded().with_duration(Duration::from_millis(250))
        );

        let result = executor.advance(&cursor, None);
        assert!(result.finished);
        let mut analysed = result.cursor.clone();
        let budget = executor.tuned_budget(&mut analysed);
        assert_eq!(budget.max_lines, analysed.budget_lines);
        assert!(budget.max_bytes.is_some());
        assert_eq!(budget.max_duration, Some(Duration::from_millis(250)));
    }

    #[test]
    fn trailing_comment_on_last_line_finishes_cleanly() {
        let (_dir, cursor) = dump("CREATE TABLE t (id INT);\nINSERT INTO t VALUES (1); -- done\n");
        let recorder = Recorder::default();
        let result = executor(ImportConfig::default(), &recorder).advance(&cursor, None);

        assert!(result.error.is_none(), "{:?}", result.error);
        assert!(result.finished);
        assert_eq!(
            *recorder.executed.lock().unwrap(),
            vec!["CREATE TABLE t (id INT);", "INSERT INTO t VALUES (1);"]
        );
    }
}
