use std::time::Duration;

use mysql::{Conn, Opts, OptsBuilder, SslOpts, prelude::Queryable};

use crate::{DataSourceKind, MySQLOptions};

use super::{DatabaseDriver, DatabaseSession, DriverError, ExecResp, validate_sql};

#[derive(Debug, Clone, Copy)]
pub struct MySQLDriver;

impl DatabaseDriver for MySQLDriver {
    type Config = MySQLOptions;

    fn create_connection(
        &self,
        config: &Self::Config,
        timeout: Duration,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let conn = open_conn(config, timeout)?;
        Ok(Box::new(MySQLSession::new(conn)))
    }
}

struct MySQLSession {
    conn: Conn,
}

impl MySQLSession {
    fn new(conn: Conn) -> Self {
        Self { conn }
    }
}

impl DatabaseSession for MySQLSession {
    fn kind(&self) -> DataSourceKind {
        DataSourceKind::MySQL
    }

    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        validate_sql(sql)?;
        self.conn
            .query_drop(sql)
            .map_err(|err| DriverError::Exec(err.to_string()))?;
        Ok(ExecResp {
            affected: self.conn.affected_rows(),
        })
    }
}

fn open_conn(
    config: &MySQLOptions,
    timeout: Duration,
) -> Result<Conn, DriverError> {
    if config.host.trim().is_empty() {
        return Err(DriverError::MissingField("host".into()));
    }
    if config.username.trim().is_empty() {
        return Err(DriverError::MissingField("username".into()));
    }
    if config.database.trim().is_empty() {
        return Err(DriverError::MissingField("database".into()));
    }
    let port = config
        .port
        .trim()
        .parse::<u16>()
        .map_err(|_| DriverError::InvalidField(format!("port: {}", config.port)))?;

    let mut builder = OptsBuilder::new();
    builder = builder.ip_or_hostname(Some(config.host.clone()));
    builder = builder.tcp_port(port);
    builder = builder.user(Some(config.username.clone()));
    builder = builder.pass(Some(config.password.clone()));
    builder = builder.db_name(Some(config.database.clone()));
    builder = builder.tcp_connect_timeout(Some(timeout));
    builder = builder.read_timeout(Some(timeout));
    builder = builder.write_timeout(Some(timeout));

    if config.use_tls {
        builder = builder.ssl_opts(Some(SslOpts::default()));
    }
    let opts = Opts::from(builder);
    Conn::new(opts).map_err(|err| DriverError::Connect(err.to_string()))
}
