use std::{io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::ConfigError;

/// 单条失败语句在错误信息中保留的最大长度
const STATEMENT_CONTEXT_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("文件不存在: {0:?}")]
    NotFound(PathBuf),

    #[error("文件不可读: {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("不支持的编码: {0}")]
    UnsupportedEncoding(String),

    #[error("读取失败 (offset {offset}): {source}")]
    Read {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("定位失败 (offset {offset}): {source}")]
    Seek {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("文件已变化: 期望 {expected} 字节, 实际 {actual} 字节")]
    IdentityMismatch { expected: u64, actual: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("语句超过 {limit} 行")]
    TooManyLines { lines: u64, limit: u64 },

    #[error("语句超过 {limit} 字节 (当前 {bytes})")]
    TooLarge { bytes: u64, limit: u64 },

    #[error("文件结束时语句未终止{}", unterminated_hint(.inside_string))]
    Unterminated { inside_string: bool },

    #[error("CSV 记录无法解析: {0}")]
    Csv(String),
}

/// 批处理不变量被破坏，属于引擎缺陷
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("批处理不变量被破坏: {0}")]
pub struct BatchInvariantError(pub String);

/// 目标库拒绝执行某条语句
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("第 {line} 行语句执行失败: {message}")]
pub struct ExecutionError {
    pub line: u64,
    pub statement: String,
    pub object: Option<String>,
    pub message: String,
    pub conflict: bool,
}

impl ExecutionError {
    pub fn new(
        line: u64,
        statement: &str,
        object: Option<String>,
        message: String,
        conflict: bool,
    ) -> Self {
        Self {
            line,
            statement: truncate(statement, STATEMENT_CONTEXT_LIMIT),
            object,
            message,
            conflict,
        }
    }

    /// 冲突类错误给出的补救语句，由调用方决定是否执行
    pub fn remediation(&self) -> Option<String> {
        if !self.conflict {
            return None;
        }
        self.object
            .as_ref()
            .map(|object| format!("DROP TABLE IF EXISTS {};", object))
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("数据流错误: {0}")]
    Stream(#[from] StreamError),

    #[error("第 {line} 行解析错误: {source}")]
    Parse {
        line: u64,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Batch(#[from] BatchInvariantError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("导入已失败: {}", .0.message)]
    AlreadyFailed(FailureRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Config,
    Stream,
    Parse,
    Batch,
    Execution,
}

/// 可序列化的失败记录，随游标一起持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
    pub line: Option<u64>,
    pub statement: Option<String>,
    pub object: Option<String>,
    pub conflict: bool,
    pub remediation: Option<String>,
}

impl From<&ImportError> for FailureRecord {
    fn from(err: &ImportError) -> Self {
        let mut record = FailureRecord {
            kind: FailureKind::Stream,
            message: err.to_string(),
            line: None,
            statement: None,
            object: None,
            conflict: false,
            remediation: None,
        };
        match err {
            ImportError::Config(_) => record.kind = FailureKind::Config,
            ImportError::Stream(_) => record.kind = FailureKind::Stream,
            ImportError::Parse { line, .. } => {
                record.kind = FailureKind::Parse;
                record.line = Some(*line);
            }
            ImportError::Batch(_) => record.kind = FailureKind::Batch,
            ImportError::Execution(exec) => {
                record.kind = FailureKind::Execution;
                record.line = Some(exec.line);
                record.statement = Some(exec.statement.clone());
                record.object = exec.object.clone();
                record.conflict = exec.conflict;
                record.remediation = exec.remediation();
            }
            ImportError::AlreadyFailed(previous) => return previous.clone(),
        }
        record
    }
}

fn unterminated_hint(inside_string: &bool) -> &'static str {
    if *inside_string { "（字符串未闭合）" } else { "" }
}

fn truncate(
    text: &str,
    limit: usize,
) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
