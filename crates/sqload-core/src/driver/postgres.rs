use std::time::Duration;

use postgres::{Client, Config, NoTls};

use crate::{DataSourceKind, PostgresOptions};

use super::{DatabaseDriver, DatabaseSession, DriverError, ExecResp, validate_sql};

#[derive(Debug, Clone, Copy)]
pub struct PostgresDriver;

impl DatabaseDriver for PostgresDriver {
    type Config = PostgresOptions;

    fn create_connection(
        &self,
        config: &Self::Config,
        timeout: Duration,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let client = open_conn(config, timeout)?;
        Ok(Box::new(PostgresSession::new(client)))
    }
}

struct PostgresSession {
    client: Client,
}

impl PostgresSession {
    fn new(client: Client) -> Self {
        Self { client }
    }
}

impl DatabaseSession for PostgresSession {
    fn kind(&self) -> DataSourceKind {
        DataSourceKind::Postgres
    }

    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        validate_sql(sql)?;
        // simple_query 走简单查询协议，支持多语句文本与 DO 块
        let messages = self
            .client
            .simple_query(sql)
            .map_err(|err| DriverError::Exec(format_pg_error(&err)))?;
        let affected = messages
            .iter()
            .map(|msg| match msg {
                postgres::SimpleQueryMessage::CommandComplete(rows) => *rows,
                _ => 0,
            })
            .sum();
        Ok(ExecResp { affected })
    }
}

fn open_conn(
    config: &PostgresOptions,
    timeout: Duration,
) -> Result<Client, DriverError> {
    if config.host.trim().is_empty() {
        return Err(DriverError::MissingField("host".into()));
    }
    if config.username.trim().is_empty() {
        return Err(DriverError::MissingField("username".into()));
    }
    if config.database.trim().is_empty() {
        return Err(DriverError::MissingField("database".into()));
    }
    if config.use_tls {
        return Err(DriverError::Other("PostgreSQL 暂未支持 TLS 连接".into()));
    }
    let port = config
        .port
        .trim()
        .parse::<u16>()
        .map_err(|_| DriverError::InvalidField(format!("port: {}", config.port)))?;

    let mut pg_config = Config::new();
    pg_config.host(config.host.trim());
    pg_config.port(port);
    pg_config.user(config.username.trim());
    pg_config.password(config.password.as_str());
    pg_config.dbname(config.database.trim());
    pg_config.connect_timeout(timeout);

    let mut client = pg_config
        .connect(NoTls)
        .map_err(|err| DriverError::Connect(err.to_string()))?;
    client
        .batch_execute(&format!("SET statement_timeout = {}", timeout.as_millis()))
        .map_err(|err| DriverError::Connect(format!("设置超时失败: {}", err)))?;
    Ok(client)
}

/// 附带 SQLSTATE，便于识别冲突类错误
fn format_pg_error(err: &postgres::Error) -> String {
    match err.code() {
        Some(code) => format!("{} ({})", err, code.code()),
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_is_not_supported() {
        let opts = PostgresOptions {
            database: "shop".into(),
            use_tls: true,
            ..PostgresOptions::default()
        };
        assert!(matches!(
            PostgresDriver.create_connection(&opts, Duration::from_secs(1)),
            Err(DriverError::Other(_))
        ));
    }

    #[test]
    fn missing_database_is_rejected_before_connecting() {
        let opts = PostgresOptions::default();
        assert!(matches!(
            PostgresDriver.create_connection(&opts, Duration::from_secs(1)),
            Err(DriverError::MissingField(field)) if field == "database"
        ));
    }
}
