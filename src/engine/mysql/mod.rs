//! MySQL Backend Adapter
//!
//! Implements `BackendAdapter` for MySQL (including MariaDB).
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - One session per adapter, autocommit mode
//! - Statements without params use the text protocol; values are coerced by column type
//! - BLOB data is Base64-encoded when it is not valid UTF-8
//! - MySQL has no schema level below the database: `TABLE_SCHEMA` is the database name
//!   and the schema argument never narrows introspection

use async_trait::async_trait;
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, Opts, OptsBuilder, QueryResult as MySqlResult, Row, Value};
use tracing::{debug, info};

use crate::engine::{
    bytes_value, connect_within, float_value, BackendAdapter, ColumnDescription, ColumnMeta,
    ConnectionConfig, Driver, Execution, SqlParam, TableEntry,
};
use crate::error::{Result, SqlGateError};

const ENGINE: &str = "mysql";

const TABLES_SQL: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE \
     FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME";

const COLUMNS_SQL: &str = "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, CHARACTER_MAXIMUM_LENGTH, \
     COLUMN_DEFAULT, ORDINAL_POSITION FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION";

/// MySQL adapter holding at most one session
pub struct MySqlAdapter {
    config: ConnectionConfig,
    conn: Option<Conn>,
}

impl MySqlAdapter {
    #[must_use]
    pub const fn new(config: ConnectionConfig) -> Self {
        Self { config, conn: None }
    }

    fn conn_mut(&mut self) -> Result<&mut Conn> {
        let name = &self.config.name;
        self.conn
            .as_mut()
            .ok_or_else(|| SqlGateError::connection_failed(name.as_str(), "not connected"))
    }

    async fn open_session(&mut self) -> Result<&mut Conn> {
        self.ensure_connected().await?;
        self.conn_mut()
    }
}

#[async_trait]
impl BackendAdapter for MySqlAdapter {
    fn driver(&self) -> Driver {
        Driver::MySql
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        let opts = build_mysql_opts(&self.config)?;
        let name = self.config.name.clone();
        let conn = connect_within(&self.config, async {
            Conn::new(opts).await.map_err(|e| {
                SqlGateError::connection_failed(name.as_str(), format!("Failed to connect to MySQL: {e}"))
            })
        })
        .await?;

        info!(connection = %self.config.name, host = %self.config.host, "mysql session opened");
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await.map_err(|e| {
                SqlGateError::connection_failed(
                    self.config.name.as_str(),
                    format!("Failed to disconnect: {e}"),
                )
            })?;
            info!(connection = %self.config.name, "mysql session closed");
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<Execution> {
        let conn = self.open_session().await?;

        if params.is_empty() {
            let result = conn.query_iter(sql).await.map_err(query_failed)?;
            drain(result).await
        } else {
            let values: Vec<Value> = params.iter().map(param_value).collect();
            let result = conn.exec_iter(sql, values).await.map_err(query_failed)?;
            drain(result).await
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.as_mut() {
            conn.query_drop("ROLLBACK").await.map_err(query_failed)?;
            debug!(connection = %self.config.name, "rollback issued");
        }
        Ok(())
    }

    async fn get_databases(&mut self) -> Result<Vec<String>> {
        let conn = self.open_session().await?;
        let rows: Vec<Row> = conn.query("SHOW DATABASES").await.map_err(engine_error)?;
        Ok(rows.iter().filter_map(|row| cell_text(row, 0)).collect())
    }

    async fn get_tables(&mut self, database: &str, _schema: Option<&str>) -> Result<Vec<TableEntry>> {
        let conn = self.open_session().await?;
        let rows: Vec<Row> = conn.exec(TABLES_SQL, (database,)).await.map_err(engine_error)?;

        rows.iter()
            .map(|row| {
                Ok(TableEntry {
                    schema: cell_text(row, 0),
                    table: required_text(row, 1, "TABLE_NAME")?,
                    table_type: cell_text(row, 2).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn describe_table(
        &mut self,
        database: &str,
        table: &str,
        _schema: Option<&str>,
    ) -> Result<Vec<ColumnDescription>> {
        let conn = self.open_session().await?;
        let rows: Vec<Row> =
            conn.exec(COLUMNS_SQL, (database, table)).await.map_err(engine_error)?;

        rows.iter()
            .map(|row| {
                Ok(ColumnDescription {
                    column: required_text(row, 0, "COLUMN_NAME")?,
                    data_type: cell_text(row, 1).unwrap_or_default(),
                    nullable: cell_text(row, 2).is_some_and(|v| v.eq_ignore_ascii_case("YES")),
                    max_length: cell_i64(row, 3),
                    default: cell_text(row, 4),
                    position: cell_i64(row, 5).and_then(|p| u32::try_from(p).ok()).unwrap_or(0),
                })
            })
            .collect()
    }
}

/// Build connection options from config
///
/// A `mysql://` connection string supplies base options; explicit fields override it.
fn build_mysql_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    if config.trusted_connection {
        return Err(SqlGateError::connection_failed(
            config.name.as_str(),
            "trusted_connection is not supported by the mysql driver",
        ));
    }
    if config.host.is_empty() && config.connection_string.is_none() {
        return Err(SqlGateError::connection_failed(
            config.name.as_str(),
            "MySQL requires 'host' parameter",
        ));
    }

    let mut opts = match &config.connection_string {
        Some(url) => {
            let base = Opts::from_url(url).map_err(|e| {
                SqlGateError::connection_failed(
                    config.name.as_str(),
                    format!("Invalid MySQL connection string: {e}"),
                )
            })?;
            OptsBuilder::from_opts(base)
        }
        None => OptsBuilder::default(),
    };

    if !config.host.is_empty() {
        opts = opts.ip_or_hostname(config.host.as_str()).tcp_port(config.port);
    }
    if !config.username.is_empty() {
        opts = opts.user(Some(config.username.as_str()));
    }
    if !config.password.is_empty() {
        opts = opts.pass(Some(config.password.as_str()));
    }
    if let Some(database) = config.default_database() {
        opts = opts.db_name(Some(database));
    }

    Ok(opts)
}

/// Collect the first result set and discard any that follow
async fn drain<P: Protocol>(mut result: MySqlResult<'_, '_, P>) -> Result<Execution> {
    let columns: Vec<Column> = result.columns().map(|cols| cols.to_vec()).unwrap_or_default();
    let rows: Vec<Row> = result.collect().await.map_err(query_failed)?;
    let affected = result.affected_rows();
    result.drop_result().await.map_err(query_failed)?;

    if columns.is_empty() {
        return Ok(Execution { columns: Vec::new(), rows: Vec::new(), affected });
    }

    let rows: Vec<_> = rows.iter().map(|row| row_to_json(row, &columns)).collect();
    Ok(Execution {
        columns: columns.iter().map(column_meta).collect(),
        affected: rows.len() as u64,
        rows,
    })
}

fn column_meta(column: &Column) -> ColumnMeta {
    ColumnMeta::new(
        column.name_str(),
        mysql_type_name(column.column_type()),
        !column.flags().contains(ColumnFlags::NOT_NULL_FLAG),
    )
}

fn row_to_json(row: &Row, columns: &[Column]) -> crate::engine::Row {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row.as_ref(idx).map_or(serde_json::Value::Null, |v| mysql_value_to_json(v, column));
            (column.name_str().into_owned(), value)
        })
        .collect()
}

/// Convert a MySQL value to JSON, using the column type for text-protocol values
fn mysql_value_to_json(value: &Value, column: &Column) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,

        Value::Bytes(bytes) => coerce_text(bytes, column.column_type()),

        Value::Int(i) => serde_json::Value::Number((*i).into()),

        Value::UInt(u) => serde_json::json!(*u),

        Value::Float(f) => float_value(f64::from(*f)),

        Value::Double(d) => float_value(*d),

        Value::Date(year, month, day, hour, minute, second, micro) => {
            if matches!(column.column_type(), ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE) {
                serde_json::Value::String(format!("{year:04}-{month:02}-{day:02}"))
            } else if *micro == 0 {
                serde_json::Value::String(format!(
                    "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"
                ))
            } else {
                serde_json::Value::String(format!(
                    "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"
                ))
            }
        }

        Value::Time(is_negative, days, hours, minutes, seconds, microseconds) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            serde_json::Value::String(format!(
                "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{microseconds:06}"
            ))
        }
    }
}

/// Text-protocol values arrive as bytes: numbers are parsed back by column type
fn coerce_text(bytes: &[u8], column_type: ColumnType) -> serde_json::Value {
    let parsed = std::str::from_utf8(bytes).ok().and_then(|text| match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => text
            .parse::<i64>()
            .map(serde_json::Value::from)
            .or_else(|_| text.parse::<u64>().map(serde_json::Value::from))
            .ok(),
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            text.parse::<f64>().ok().map(float_value)
        }
        _ => None,
    });

    parsed.unwrap_or_else(|| bytes_value(bytes))
}

/// Backend-agnostic name for a MySQL wire column type
fn mysql_type_name(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_STRING => "CHAR",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => "VARCHAR",
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB => "BLOB",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_ENUM => "ENUM",
        ColumnType::MYSQL_TYPE_SET => "SET",
        ColumnType::MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        ColumnType::MYSQL_TYPE_NULL => "NULL",
        _ => "UNKNOWN",
    }
}

fn param_value(param: &SqlParam) -> Value {
    match param {
        SqlParam::Null => Value::NULL,
        SqlParam::Bool(b) => Value::Int(i64::from(*b)),
        SqlParam::Int(i) => Value::Int(*i),
        SqlParam::Float(f) => Value::Double(*f),
        SqlParam::Text(s) => Value::Bytes(s.clone().into_bytes()),
    }
}

fn cell_text(row: &Row, idx: usize) -> Option<String> {
    match row.as_ref(idx)? {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(i) => Some(i.to_string()),
        Value::UInt(u) => Some(u.to_string()),
        other => Some(other.as_sql(true)),
    }
}

fn cell_i64(row: &Row, idx: usize) -> Option<i64> {
    match row.as_ref(idx)? {
        Value::Int(i) => Some(*i),
        Value::UInt(u) => i64::try_from(*u).ok(),
        Value::Bytes(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        _ => None,
    }
}

fn required_text(row: &Row, idx: usize, column: &str) -> Result<String> {
    cell_text(row, idx)
        .ok_or_else(|| SqlGateError::engine_error(ENGINE, format!("{column} missing from metadata row")))
}

fn query_failed(e: mysql_async::Error) -> SqlGateError {
    SqlGateError::query_failed(e.to_string())
}

fn engine_error(e: mysql_async::Error) -> SqlGateError {
    SqlGateError::engine_error(ENGINE, e.to_string())
}
