use std::{fs, path::Path, time::Duration};

use rusqlite::{Connection, OpenFlags};

use crate::{DataSourceKind, SQLiteOptions};

use super::{DatabaseDriver, DatabaseSession, DriverError, ExecResp, validate_sql};

#[derive(Debug, Clone, Copy)]
pub struct SQLiteDriver;

struct SQLiteConnection {
    conn: Connection,
}

impl SQLiteConnection {
    fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl DatabaseSession for SQLiteConnection {
    fn kind(&self) -> DataSourceKind {
        DataSourceKind::SQLite
    }

    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        validate_sql(sql)?;
        // execute_batch 兼容包含多条语句的文本（如触发器定义）
        let before = self.conn.total_changes();
        self.conn
            .execute_batch(sql)
            .map_err(|err| DriverError::Exec(err.to_string()))?;
        Ok(ExecResp {
            affected: self.conn.total_changes().saturating_sub(before),
        })
    }
}

impl DatabaseDriver for SQLiteDriver {
    type Config = SQLiteOptions;

    fn create_connection(
        &self,
        config: &Self::Config,
        timeout: Duration,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let conn = open_conn(config, timeout)?;
        Ok(Box::new(SQLiteConnection::new(conn)))
    }
}

fn open_conn(
    config: &SQLiteOptions,
    timeout: Duration,
) -> Result<Connection, DriverError> {
    let path_str = config.filepath.trim();
    if path_str.is_empty() {
        return Err(DriverError::MissingField("file_path".into()));
    }

    let conn = if path_str == ":memory:" {
        Connection::open_in_memory().map_err(|err| DriverError::Connect(format!("打开 SQLite 失败: {}", err)))?
    } else {
        let path = Path::new(path_str);

        if config.readonly {
            if !path.exists() {
                return Err(DriverError::InvalidField("file_path 不存在".into()));
            }
        } else if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| DriverError::Other(format!("创建目录失败: {}", err)))?;
            }
        }

        let flags = if config.readonly {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };

        Connection::open_with_flags(path, flags)
            .map_err(|err| DriverError::Connect(format!("打开 SQLite 失败: {}", err)))?
    };

    conn.busy_timeout(timeout)
        .map_err(|err| DriverError::Connect(format!("设置超时失败: {}", err)))?;
    Ok(conn)
}
