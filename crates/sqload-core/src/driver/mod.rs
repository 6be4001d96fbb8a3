use std::time::Duration;

use crate::{DataSourceKind, DataSourceOptions};

pub use mysql::MySQLDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SQLiteDriver;

mod mysql;
mod postgres;
mod sqlite;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecResp {
    pub affected: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Other(String),
    #[error("配置字段缺失: {0}")]
    MissingField(String),
    #[error("配置字段非法: {0}")]
    InvalidField(String),
    #[error("连接失败: {0}")]
    Connect(String),
    #[error("执行失败: {0}")]
    Exec(String),
}

impl DriverError {
    /// 目标库报告对象已存在（建表/建视图冲突）
    pub fn is_conflict(&self) -> bool {
        let DriverError::Exec(message) = self else {
            return false;
        };
        let lower = message.to_ascii_lowercase();
        lower.contains("already exists") || lower.contains("1050") || lower.contains("42p07")
    }
}

pub trait DatabaseDriver {
    type Config;

    fn create_connection(
        &self,
        config: &Self::Config,
        timeout: Duration,
    ) -> Result<Box<dyn DatabaseSession>, DriverError>;
}

/// 导入目标会话，单条语句的执行受连接时设置的超时约束
pub trait DatabaseSession: Send {
    fn kind(&self) -> DataSourceKind;

    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError>;
}

pub fn create_connection(
    opts: &DataSourceOptions,
    timeout: Duration,
) -> Result<Box<dyn DatabaseSession>, DriverError> {
    match opts {
        DataSourceOptions::MySQL(config) => MySQLDriver.create_connection(config, timeout),
        DataSourceOptions::SQLite(config) => SQLiteDriver.create_connection(config, timeout),
        DataSourceOptions::Postgres(config) => PostgresDriver.create_connection(config, timeout),
    }
}

pub fn validate_sql(sql: &str) -> Result<(), DriverError> {
    if sql.trim().is_empty() {
        return Err(DriverError::InvalidField("sql".into()));
    }
    Ok(())
}
