use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::stream::{Encoding, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("delimiter 不能为空")]
    EmptyDelimiter,
    #[error("delimiter 不能包含引号字符: {0}")]
    DelimiterContainsQuote(String),
    #[error("string_quote_chars 至少需要一个引号字符")]
    NoQuoteChars,
    #[error("{0} 必须大于 0")]
    Zero(&'static str),
    #[error("min_batch_size ({min}) 大于 max_batch_size ({max})")]
    BatchRange { min: u64, max: u64 },
    #[error("buffer_size 必须在 {min}..={max} 之间，实际: {actual}")]
    BufferSize { min: usize, max: usize, actual: usize },
    #[error("CSV 导入缺少目标表名")]
    CsvTable,
    #[error("CSV 分隔符必须是单个 ASCII 字符: {0:?}")]
    CsvDelimiter(char),
}

/// 调优档位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceProfile {
    #[default]
    Conservative,
    Aggressive,
}

impl PerformanceProfile {
    pub fn multiplier(&self) -> f64 {
        match self {
            PerformanceProfile::Conservative => 1.0,
            PerformanceProfile::Aggressive => 2.0,
        }
    }

    pub fn safety_margin(&self) -> f64 {
        match self {
            PerformanceProfile::Conservative => 0.8,
            PerformanceProfile::Aggressive => 0.9,
        }
    }

    /// 单次会话允许占用的物理内存比例
    pub fn memory_fraction(&self) -> f64 {
        match self {
            PerformanceProfile::Conservative => 0.10,
            PerformanceProfile::Aggressive => 0.25,
        }
    }
}

/// CSV 导入：每行一条记录，转换为单行 INSERT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub table: String,
    pub delimiter: char,
    /// 为每个字段加单引号
    pub add_quotes: bool,
    /// 转义字段中的反斜杠和单引号
    pub add_slashes: bool,
    /// 跳过首行表头
    pub skip_header: bool,
    /// 与该字符串完全相同的字段写为 NULL
    pub null_token: Option<String>,
    /// 导入前清空目标表
    pub pre_empty: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            table: String::new(),
            delimiter: ',',
            add_quotes: true,
            add_slashes: true,
            skip_header: false,
            null_token: None,
            pre_empty: false,
        }
    }
}

/// 导入配置，缺省字段使用默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub delimiter: String,
    pub string_quote_chars: Vec<char>,
    pub comment_markers: Vec<String>,
    pub max_statement_lines: u64,
    pub max_statement_bytes: u64,
    pub insert_batch_row_limit: usize,
    pub insert_batch_byte_limit: usize,
    pub performance_profile: PerformanceProfile,
    pub ram_override_bytes: Option<u64>,
    pub forced_batch_size: Option<u64>,
    pub min_batch_size: u64,
    pub max_batch_size: u64,
    /// 自动调优时单次调用的耗时上限（毫秒）
    pub invocation_time_limit_ms: Option<u64>,
    pub pre_statements: Vec<String>,
    pub post_statements: Vec<String>,
    /// None 表示按扩展名识别
    pub encoding: Option<Encoding>,
    pub buffer_size: usize,
    pub dry_run: bool,
    pub csv: Option<CsvOptions>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            delimiter: ";".into(),
            string_quote_chars: vec!['\'', '"'],
            comment_markers: vec!["#".into(), "-- ".into()],
            max_statement_lines: 300,
            max_statement_bytes: 16 * 1024 * 1024,
            insert_batch_row_limit: 1000,
            insert_batch_byte_limit: 1024 * 1024,
            performance_profile: PerformanceProfile::default(),
            ram_override_bytes: None,
            forced_batch_size: None,
            min_batch_size: 3000,
            max_batch_size: 500_000,
            invocation_time_limit_ms: None,
            pre_statements: vec![],
            post_statements: vec![],
            encoding: None,
            buffer_size: 128 * 1024,
            dry_run: false,
            csv: None,
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiter.trim().is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }
        if self.string_quote_chars.is_empty() {
            return Err(ConfigError::NoQuoteChars);
        }
        if self.delimiter.chars().any(|c| self.string_quote_chars.contains(&c)) {
            return Err(ConfigError::DelimiterContainsQuote(self.delimiter.clone()));
        }
        if self.max_statement_lines == 0 {
            return Err(ConfigError::Zero("max_statement_lines"));
        }
        if self.max_statement_bytes == 0 {
            return Err(ConfigError::Zero("max_statement_bytes"));
        }
        if self.insert_batch_byte_limit == 0 {
            return Err(ConfigError::Zero("insert_batch_byte_limit"));
        }
        if self.min_batch_size == 0 {
            return Err(ConfigError::Zero("min_batch_size"));
        }
        if self.invocation_time_limit_ms == Some(0) {
            return Err(ConfigError::Zero("invocation_time_limit_ms"));
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(ConfigError::BatchRange {
                min: self.min_batch_size,
                max: self.max_batch_size,
            });
        }
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(ConfigError::BufferSize {
                min: MIN_BUFFER_SIZE,
                max: MAX_BUFFER_SIZE,
                actual: self.buffer_size,
            });
        }
        if let Some(csv) = &self.csv {
            if csv.table.trim().is_empty() {
                return Err(ConfigError::CsvTable);
            }
            if !csv.delimiter.is_ascii() || csv.delimiter == '\n' {
                return Err(ConfigError::CsvDelimiter(csv.delimiter));
            }
        }
        Ok(())
    }
}
