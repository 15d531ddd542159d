//! Backend Adapters and Core Types
//!
//! This module defines the capability interface every backend implements and the
//! types that cross it. Each backend (`SQL Server`, `MySQL`) lives behind its own
//! cargo feature and is selected by tagged dispatch on the connection's `driver`.
//!
//! # Stateful Adapters
//! An adapter owns at most one live connection handle. Construction never touches the
//! network; the handle is opened by `connect` (or lazily by `ensure_connected`) and
//! released by `disconnect`.
//!
//! # Engine Isolation
//! Each adapter is independent. Only value coercion helpers are shared.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SqlGateError};

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

/// Default connection establishment timeout
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Supported backend drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Driver {
    /// Microsoft SQL Server
    #[serde(rename = "sql_server")]
    SqlServer,
    /// `MySQL` (includes `MariaDB`)
    #[serde(rename = "mysql")]
    MySql,
}

impl Driver {
    /// Every driver the configuration format knows about
    pub const ALL: [Self; 2] = [Self::SqlServer, Self::MySql];

    /// Get the driver name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SqlServer => "sql_server",
            Self::MySql => "mysql",
        }
    }

    /// Port used when the configuration omits one
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::SqlServer => 1433,
            Self::MySql => 3306,
        }
    }

    /// Whether an adapter for this driver is compiled in
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        match self {
            Self::SqlServer => cfg!(feature = "sqlserver"),
            Self::MySql => cfg!(feature = "mysql"),
        }
    }

    /// Drivers with a compiled-in adapter
    #[must_use]
    pub fn supported() -> Vec<&'static str> {
        Self::ALL.iter().filter(|d| d.is_enabled()).map(Self::as_str).collect()
    }

    /// Quote an identifier with this backend's rules
    #[must_use]
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Self::SqlServer => format!("[{}]", name.replace(']', "]]")),
            Self::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Statement switching the session's current database
    #[must_use]
    pub fn switch_statement(&self, database: &str) -> String {
        format!("USE {}", self.quote_identifier(database))
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Driver {
    type Err = SqlGateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s).ok_or_else(|| {
            SqlGateError::config_error(format!(
                "Unknown driver '{s}'. Valid drivers: {:?}",
                Self::ALL.map(|d| d.as_str())
            ))
        })
    }
}

/// Resolved configuration for one named connection
///
/// Built once at startup and never mutated.
#[derive(Clone, Serialize)]
pub struct ConnectionConfig {
    /// Unique connection name
    pub name: String,

    pub driver: Driver,

    pub host: String,

    pub port: u16,

    /// Default database ("" when none)
    pub database: String,

    pub username: String,

    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing)]
    pub password: String,

    /// Integrated/OS authentication instead of username + password
    pub trusted_connection: bool,

    /// Driver-specific base options (ADO.NET string or `mysql://` URL)
    #[serde(skip_serializing)]
    pub connection_string: Option<String>,

    pub connect_timeout_secs: u64,

    /// Driver-specific options not covered above
    pub extra: BTreeMap<String, Value>,
}

impl ConnectionConfig {
    /// Create a config with driver defaults (default port, 10s connect timeout)
    pub fn new(name: impl Into<String>, driver: Driver, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver,
            host: host.into(),
            port: driver.default_port(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            trusted_connection: false,
            connection_string: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Configured default database, if any
    #[must_use]
    pub fn default_database(&self) -> Option<&str> {
        Some(self.database.as_str()).filter(|db| !db.is_empty())
    }

    /// Boolean driver option from the extension map
    #[must_use]
    pub fn extra_flag(&self, key: &str) -> bool {
        self.extra.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// String driver option from the extension map
    #[must_use]
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Summary safe to hand to callers
    #[must_use]
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            name: self.name.clone(),
            driver: self.driver,
            host: self.host.clone(),
            database: self.database.clone(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("trusted_connection", &self.trusted_connection)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Connection listing entry (no credentials)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub driver: Driver,
    pub host: String,
    pub database: String,
}

/// Result-set column descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Backend-agnostic type name
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self { name: name.into(), type_name: type_name.into(), nullable }
    }
}

/// One result row in column order
pub type Row = serde_json::Map<String, Value>;

/// Raw outcome of one `execute` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    /// Affected rows, or the number of rows returned for result sets
    pub affected: u64,
}

/// Table listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub schema: Option<String>,
    pub table: String,
    #[serde(rename = "type")]
    pub table_type: String,
}

/// Column description from `describe_table`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub column: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub max_length: Option<i64>,
    pub default: Option<String>,
    pub position: u32,
}

/// Positional statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Backend adapter capability interface
///
/// All methods take `&mut self`: an adapter is exclusively owned by the registry and used by
/// one operation at a time.
#[async_trait]
pub trait BackendAdapter: Send {
    /// Driver this adapter speaks
    fn driver(&self) -> Driver;

    /// Whether a live handle is held
    fn is_connected(&self) -> bool;

    /// Open the handle (atomic success-or-failure)
    async fn connect(&mut self) -> Result<()>;

    /// Release the handle if one is held
    async fn disconnect(&mut self) -> Result<()>;

    /// Execute one statement
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<Execution>;

    /// Roll back whatever the last failed statement left open
    async fn rollback(&mut self) -> Result<()>;

    async fn get_databases(&mut self) -> Result<Vec<String>>;

    async fn get_tables(&mut self, database: &str, schema: Option<&str>) -> Result<Vec<TableEntry>>;

    async fn describe_table(
        &mut self,
        database: &str,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnDescription>>;

    /// Connect unless a handle is already held
    async fn ensure_connected(&mut self) -> Result<()> {
        if !self.is_connected() {
            self.connect().await?;
        }
        Ok(())
    }
}

/// Instantiate the adapter matching the connection's driver
///
/// Does not open a connection.
pub fn create_adapter(config: &ConnectionConfig) -> Result<Box<dyn BackendAdapter>> {
    match config.driver {
        #[cfg(feature = "sqlserver")]
        Driver::SqlServer => Ok(Box::new(sqlserver::SqlServerAdapter::new(config.clone()))),
        #[cfg(feature = "mysql")]
        Driver::MySql => Ok(Box::new(mysql::MySqlAdapter::new(config.clone()))),
        #[allow(unreachable_patterns)]
        other => Err(SqlGateError::connection_failed(
            &config.name,
            format!("Unsupported driver '{other}'. Supported: {:?}", Driver::supported()),
        )),
    }
}

/// Run a connect future under the connection's establishment timeout
#[cfg_attr(not(any(feature = "mysql", feature = "sqlserver")), allow(dead_code))]
pub(crate) async fn connect_within<T>(
    config: &ConnectionConfig,
    connect: impl Future<Output = Result<T>>,
) -> Result<T> {
    let limit = Duration::from_secs(config.connect_timeout_secs);
    tokio::time::timeout(limit, connect).await.map_err(|_| {
        SqlGateError::connection_failed(
            &config.name,
            format!("timed out after {}s connecting to {}:{}", limit.as_secs(), config.host, config.port),
        )
    })?
}

/// Number value, or null for NaN/infinity
#[cfg_attr(not(any(feature = "mysql", feature = "sqlserver")), allow(dead_code))]
pub(crate) fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// UTF-8 text as-is, anything else Base64-encoded
#[cfg_attr(not(any(feature = "mysql", feature = "sqlserver")), allow(dead_code))]
pub(crate) fn bytes_value(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::String(general_purpose::STANDARD.encode(bytes)),
    }
}
