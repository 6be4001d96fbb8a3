use std::path::PathBuf;

use crate::{CsvImportConfig, exec::ImportJob};

/// CSV 导入：逐行转换为 INSERT，复用 SQL 导入的执行流程
pub fn job(config: &CsvImportConfig) -> ImportJob {
    tracing::info!("CSV 导入: table={}, delimiter={:?}", config.csv.table, config.csv.delimiter);
    let mut options = config.options.clone();
    options.csv = Some(config.csv.clone());

    ImportJob {
        file: PathBuf::from(&config.file),
        timeout_seconds: config.timeout_seconds,
        config: options,
    }
}
