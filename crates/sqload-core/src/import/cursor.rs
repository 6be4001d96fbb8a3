use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::{
    analysis::FileAnalysis,
    batch::BatchAccumulator,
    config::ImportConfig,
    error::{FailureRecord, StreamError},
    parser::ParserState,
    stream::Encoding,
    tuner::TuningSample,
};

/// 导入文件的身份：路径、磁盘大小、编码
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub size: u64,
    pub encoding: Encoding,
}

impl FileIdentity {
    /// encoding 为 None 时按扩展名识别
    pub fn probe(
        path: impl AsRef<Path>,
        encoding: Option<Encoding>,
    ) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let encoding = match encoding {
            Some(encoding) => encoding,
            None => Encoding::from_path(path)?,
        };
        Ok(Self {
            path: path.to_path_buf(),
            size: disk_size(path)?,
            encoding,
        })
    }

    /// 文件大小变化说明内容已变，游标不再可信
    pub fn verify(&self) -> Result<(), StreamError> {
        let actual = disk_size(&self.path)?;
        if actual != self.size {
            return Err(StreamError::IdentityMismatch {
                expected: self.size,
                actual,
            });
        }
        Ok(())
    }
}

fn disk_size(path: &Path) -> Result<u64, StreamError> {
    let metadata = fs::metadata(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => StreamError::NotFound(path.to_path_buf()),
        _ => StreamError::Unreadable {
            path: path.to_path_buf(),
            source,
        },
    })?;
    Ok(metadata.len())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    #[default]
    Fresh,
    Running,
    Finished,
    Failed,
}

/// 续传所需的全部状态，不含任何活动句柄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportCursor {
    pub import_id: String,
    pub file: FileIdentity,
    pub phase: ImportPhase,
    /// 最后一个完整消费的行之后的逻辑偏移
    pub byte_offset: u64,
    pub line_number: u64,
    /// 已解析出的语句数
    pub query_count: u64,
    /// 已发送到目标库的语句数（合并后）
    pub executed_count: u64,
    pub parser: ParserState,
    pub batch: BatchAccumulator,
    pub analysis: Option<FileAnalysis>,
    /// 上一次调用使用的行预算
    pub budget_lines: Option<u64>,
    pub history: Vec<TuningSample>,
    pub pre_statements_done: bool,
    pub failure: Option<FailureRecord>,
}

impl ImportCursor {
    pub fn new(
        file: FileIdentity,
        delimiter: &str,
    ) -> Self {
        Self {
            import_id: uuid::Uuid::new_v4().to_string(),
            file,
            phase: ImportPhase::Fresh,
            byte_offset: 0,
            line_number: 0,
            query_count: 0,
            executed_count: 0,
            parser: ParserState::new(delimiter),
            batch: BatchAccumulator::default(),
            analysis: None,
            budget_lines: None,
            history: vec![],
            pre_statements_done: false,
            failure: None,
        }
    }

    /// 为文件创建全新游标
    pub fn start(
        path: impl AsRef<Path>,
        config: &ImportConfig,
    ) -> Result<Self, StreamError> {
        let file = FileIdentity::probe(path, config.encoding)?;
        Ok(Self::new(file, &config.delimiter))
    }

    pub fn is_finished(&self) -> bool {
        self.phase == ImportPhase::Finished
    }

    pub fn is_failed(&self) -> bool {
        self.phase == ImportPhase::Failed
    }

    /// 按字节估算的进度，0.0 ~ 1.0
    pub fn progress(&self) -> Option<f64> {
        if self.is_finished() {
            return Some(1.0);
        }
        let total = self.analysis.as_ref()?.estimated_bytes;
        if total == 0 {
            return None;
        }
        Some((self.byte_offset as f64 / total as f64).min(1.0))
    }
}
