//! SQL Server Backend Adapter
//!
//! Implements `BackendAdapter` for Microsoft SQL Server over `tiberius`.
//!
//! # Implementation Notes
//! - TDS over a tokio `TcpStream`, bridged with `tokio-util` compat
//! - SQL authentication, or integrated authentication on Windows
//! - One session per adapter, autocommit mode
//! - SELECT statements are streamed for rows; everything else is executed for its
//!   affected-row count
//! - The TDS column metadata does not carry nullability, so result columns report
//!   `nullable: true`

use std::borrow::Cow;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use tiberius::{
    AuthMethod, Client, Column, ColumnData, ColumnType, Config, EncryptionLevel, FromSql, Row, ToSql,
};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::capability::classify;
use crate::engine::{
    connect_within, float_value, BackendAdapter, ColumnDescription, ColumnMeta, ConnectionConfig,
    Driver, Execution, SqlParam, TableEntry,
};
use crate::error::{Result, SqlGateError};

const ENGINE: &str = "sql_server";

const ROLLBACK_SQL: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

type SqlClient = Client<Compat<TcpStream>>;

/// SQL Server adapter holding at most one session
pub struct SqlServerAdapter {
    config: ConnectionConfig,
    client: Option<SqlClient>,
}

impl SqlServerAdapter {
    #[must_use]
    pub const fn new(config: ConnectionConfig) -> Self {
        Self { config, client: None }
    }

    async fn open_session(&mut self) -> Result<&mut SqlClient> {
        self.ensure_connected().await?;
        let name = &self.config.name;
        self.client
            .as_mut()
            .ok_or_else(|| SqlGateError::connection_failed(name.as_str(), "not connected"))
    }
}

#[async_trait]
impl BackendAdapter for SqlServerAdapter {
    fn driver(&self) -> Driver {
        Driver::SqlServer
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        let tiberius_config = build_tiberius_config(&self.config)?;
        let client = connect_within(&self.config, open_client(&self.config.name, tiberius_config)).await?;

        info!(connection = %self.config.name, host = %self.config.host, "sql server session opened");
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await.map_err(|e| {
                SqlGateError::connection_failed(
                    self.config.name.as_str(),
                    format!("Failed to disconnect: {e}"),
                )
            })?;
            info!(connection = %self.config.name, "sql server session closed");
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<Execution> {
        let client = self.open_session().await?;
        let bound: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        if !classify(sql).returns_rows() {
            let result = client.execute(sql, &bound).await.map_err(query_failed)?;
            return Ok(Execution {
                columns: Vec::new(),
                rows: Vec::new(),
                affected: result.rows_affected().iter().sum(),
            });
        }

        let mut stream = client.query(sql, &bound).await.map_err(query_failed)?;
        let columns: Vec<ColumnMeta> = stream
            .columns()
            .await
            .map_err(query_failed)?
            .map(|cols| cols.iter().map(column_meta).collect())
            .unwrap_or_default();
        let rows = stream.into_first_result().await.map_err(query_failed)?;

        let rows: Vec<_> = rows.iter().map(row_to_json).collect();
        Ok(Execution { columns, affected: rows.len() as u64, rows })
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(client) = self.client.as_mut() {
            client.execute(ROLLBACK_SQL, &[]).await.map_err(query_failed)?;
            debug!(connection = %self.config.name, "rollback issued");
        }
        Ok(())
    }

    async fn get_databases(&mut self) -> Result<Vec<String>> {
        let client = self.open_session().await?;
        let rows = client
            .query("SELECT name FROM sys.databases ORDER BY name", &[])
            .await
            .map_err(engine_error)?
            .into_first_result()
            .await
            .map_err(engine_error)?;

        Ok(rows.iter().filter_map(|row| text(row, 0)).collect())
    }

    async fn get_tables(&mut self, database: &str, schema: Option<&str>) -> Result<Vec<TableEntry>> {
        let sql = format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE FROM {}.INFORMATION_SCHEMA.TABLES{} \
             ORDER BY TABLE_SCHEMA, TABLE_NAME",
            Driver::SqlServer.quote_identifier(database),
            if schema.is_some() { " WHERE TABLE_SCHEMA = @P1" } else { "" },
        );
        let mut params: Vec<&dyn ToSql> = Vec::new();
        if let Some(schema) = &schema {
            params.push(schema);
        }

        let client = self.open_session().await?;
        let rows = client
            .query(sql, &params)
            .await
            .map_err(engine_error)?
            .into_first_result()
            .await
            .map_err(engine_error)?;

        rows.iter()
            .map(|row| {
                Ok(TableEntry {
                    schema: text(row, 0),
                    table: required_text(row, 1, "TABLE_NAME")?,
                    table_type: text(row, 2).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn describe_table(
        &mut self,
        database: &str,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnDescription>> {
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, CHARACTER_MAXIMUM_LENGTH, COLUMN_DEFAULT, \
             ORDINAL_POSITION FROM {}.INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = @P1{} \
             ORDER BY ORDINAL_POSITION",
            Driver::SqlServer.quote_identifier(database),
            if schema.is_some() { " AND TABLE_SCHEMA = @P2" } else { "" },
        );
        let mut params: Vec<&dyn ToSql> = Vec::new();
        params.push(&table);
        if let Some(schema) = &schema {
            params.push(schema);
        }

        let client = self.open_session().await?;
        let rows = client
            .query(sql, &params)
            .await
            .map_err(engine_error)?
            .into_first_result()
            .await
            .map_err(engine_error)?;

        rows.iter()
            .map(|row| {
                Ok(ColumnDescription {
                    column: required_text(row, 0, "COLUMN_NAME")?,
                    data_type: text(row, 1).unwrap_or_default(),
                    nullable: text(row, 2).is_some_and(|v| v.eq_ignore_ascii_case("YES")),
                    max_length: int(row, 3),
                    default: text(row, 4),
                    position: int(row, 5).and_then(|p| u32::try_from(p).ok()).unwrap_or(0),
                })
            })
            .collect()
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Self::Null => ColumnData::String(None),
            Self::Bool(b) => ColumnData::Bit(Some(*b)),
            Self::Int(i) => ColumnData::I64(Some(*i)),
            Self::Float(f) => ColumnData::F64(Some(*f)),
            Self::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
        }
    }
}

/// Build the tiberius config
///
/// An ADO.NET connection string supplies base options; explicit fields override it.
fn build_tiberius_config(config: &ConnectionConfig) -> Result<Config> {
    let mut tiberius_config = match &config.connection_string {
        Some(ado) => Config::from_ado_string(ado).map_err(|e| {
            SqlGateError::connection_failed(
                config.name.as_str(),
                format!("Invalid SQL Server connection string: {e}"),
            )
        })?,
        None => Config::new(),
    };

    if !config.host.is_empty() {
        tiberius_config.host(&config.host);
        tiberius_config.port(config.port);
    } else if config.connection_string.is_none() {
        return Err(SqlGateError::connection_failed(
            config.name.as_str(),
            "SQL Server requires 'host' parameter",
        ));
    }
    if let Some(database) = config.default_database() {
        tiberius_config.database(database);
    }

    if config.trusted_connection {
        tiberius_config.authentication(integrated_auth(config)?);
    } else if !config.username.is_empty() {
        tiberius_config.authentication(AuthMethod::sql_server(&config.username, &config.password));
    }

    if config.extra_flag("trust_server_certificate") {
        tiberius_config.trust_cert();
    }
    if let Some(level) = config.extra_str("encrypt") {
        tiberius_config.encryption(encryption_level(config, level)?);
    }
    if let Some(app) = config.extra_str("application_name") {
        tiberius_config.application_name(app);
    }

    Ok(tiberius_config)
}

#[cfg(all(windows, feature = "winauth"))]
#[allow(clippy::unnecessary_wraps)]
fn integrated_auth(_config: &ConnectionConfig) -> Result<AuthMethod> {
    Ok(AuthMethod::Integrated)
}

#[cfg(not(all(windows, feature = "winauth")))]
fn integrated_auth(config: &ConnectionConfig) -> Result<AuthMethod> {
    Err(SqlGateError::connection_failed(
        config.name.as_str(),
        "trusted_connection requires Windows integrated authentication",
    ))
}

fn encryption_level(config: &ConnectionConfig, level: &str) -> Result<EncryptionLevel> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Ok(EncryptionLevel::Off),
        "on" => Ok(EncryptionLevel::On),
        "required" => Ok(EncryptionLevel::Required),
        "not_supported" => Ok(EncryptionLevel::NotSupported),
        other => Err(SqlGateError::connection_failed(
            config.name.as_str(),
            format!("Unknown encrypt level '{other}'. Valid: off, on, required, not_supported"),
        )),
    }
}

async fn open_client(name: &str, config: Config) -> Result<SqlClient> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| SqlGateError::connection_failed(name, format!("TCP connect failed: {e}")))?;

    tcp.set_nodelay(true)
        .map_err(|e| SqlGateError::connection_failed(name, format!("TCP setup failed: {e}")))?;

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| SqlGateError::connection_failed(name, format!("Failed to connect to SQL Server: {e}")))
}

fn column_meta(column: &Column) -> ColumnMeta {
    ColumnMeta::new(column.name(), sqlserver_type_name(column.column_type()), true)
}

fn row_to_json(row: &Row) -> crate::engine::Row {
    row.cells()
        .enumerate()
        .map(|(idx, (column, data))| (column.name().to_string(), cell_to_json(row, idx, data)))
        .collect()
}

/// Convert one cell to a JSON scalar
fn cell_to_json(row: &Row, idx: usize, data: &ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I16(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I32(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::from),
        ColumnData::F32(v) => v.map_or(Value::Null, |f| float_value(f64::from(f))),
        ColumnData::F64(v) => v.map_or(Value::Null, float_value),
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::String(v) => v.as_deref().map_or(Value::Null, |s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map_or(Value::Null, |g| Value::String(g.to_string())),
        ColumnData::Numeric(v) => v.as_ref().map_or(Value::Null, |n| Value::String(n.to_string())),
        ColumnData::Binary(v) => v
            .as_deref()
            .map_or(Value::Null, |b| Value::String(general_purpose::STANDARD.encode(b))),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            temporal(row, idx, |v: NaiveDateTime| v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        ColumnData::Date(_) => temporal(row, idx, |v: NaiveDate| v.format("%Y-%m-%d").to_string()),
        ColumnData::Time(_) => temporal(row, idx, |v: NaiveTime| v.format("%H:%M:%S%.f").to_string()),
        ColumnData::DateTimeOffset(_) => {
            temporal(row, idx, |v: DateTime<FixedOffset>| v.to_rfc3339())
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn temporal<'a, T: FromSql<'a>>(row: &'a Row, idx: usize, render: impl Fn(T) -> String) -> Value {
    match row.try_get::<T, _>(idx) {
        Ok(Some(value)) => Value::String(render(value)),
        _ => Value::Null,
    }
}

/// Backend-agnostic name for a TDS column type
fn sqlserver_type_name(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Bit | ColumnType::Bitn => "BIT",
        ColumnType::Int1 => "TINYINT",
        ColumnType::Int2 => "SMALLINT",
        ColumnType::Int4 | ColumnType::Intn => "INT",
        ColumnType::Int8 => "BIGINT",
        ColumnType::Float4 => "REAL",
        ColumnType::Float8 | ColumnType::Floatn => "FLOAT",
        ColumnType::Money | ColumnType::Money4 => "MONEY",
        ColumnType::Decimaln => "DECIMAL",
        ColumnType::Numericn => "NUMERIC",
        ColumnType::Guid => "UNIQUEIDENTIFIER",
        ColumnType::Datetime | ColumnType::Datetimen => "DATETIME",
        ColumnType::Datetime4 => "SMALLDATETIME",
        ColumnType::Daten => "DATE",
        ColumnType::Timen => "TIME",
        ColumnType::Datetime2 => "DATETIME2",
        ColumnType::DatetimeOffsetn => "DATETIMEOFFSET",
        ColumnType::BigChar => "CHAR",
        ColumnType::BigVarChar => "VARCHAR",
        ColumnType::NChar => "NCHAR",
        ColumnType::NVarchar => "NVARCHAR",
        ColumnType::Text => "TEXT",
        ColumnType::NText => "NTEXT",
        ColumnType::BigBinary => "BINARY",
        ColumnType::BigVarBin => "VARBINARY",
        ColumnType::Image => "IMAGE",
        ColumnType::Xml => "XML",
        ColumnType::SSVariant => "SQL_VARIANT",
        ColumnType::Null => "NULL",
        #[allow(unreachable_patterns)]
        _ => "UNKNOWN",
    }
}

fn text(row: &Row, idx: usize) -> Option<String> {
    row.try_get::<&str, _>(idx).ok().flatten().map(str::to_string)
}

fn int(row: &Row, idx: usize) -> Option<i64> {
    row.try_get::<i32, _>(idx)
        .ok()
        .flatten()
        .map(i64::from)
        .or_else(|| row.try_get::<i64, _>(idx).ok().flatten())
}

fn required_text(row: &Row, idx: usize, column: &str) -> Result<String> {
    text(row, idx)
        .ok_or_else(|| SqlGateError::engine_error(ENGINE, format!("{column} missing from metadata row")))
}

fn query_failed(e: tiberius::error::Error) -> SqlGateError {
    SqlGateError::query_failed(e.to_string())
}

fn engine_error(e: tiberius::error::Error) -> SqlGateError {
    SqlGateError::engine_error(ENGINE, e.to_string())
}
