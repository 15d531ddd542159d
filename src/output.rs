//! JSON Output Types
//!
//! This module defines the normalized result shapes returned by every operation.
//! No operation ever surfaces a raw fault: failures are folded into the same shapes with
//! `success: false` and an `error` object carrying the stable code.
//!
//! # Output Contract
//! - Execution: `{"success", "connection", "database", "columns", "rows", "row_count",
//!   "execution_time_ms", "message", "statement_type", "error"?}`
//! - Introspection: `{"success", "connection", "database"?, <operation data>,
//!   "execution_time_ms", "message"?, "error"?}`

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{ColumnDescription, ColumnMeta, ConnectionSummary, Execution, Row, TableEntry};
use crate::error::SqlGateError;

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "VALIDATION_FAILED", "CONNECTION_FAILED")
    pub code: String,

    /// Human-readable error message (no sensitive data)
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

impl From<&SqlGateError> for ErrorInfo {
    fn from(err: &SqlGateError) -> Self {
        Self::new(err.error_code(), err.message())
    }
}

/// Whether an operation result reports success
pub trait Outcome {
    fn succeeded(&self) -> bool;
}

/// Milliseconds rounded to two decimals
#[must_use]
pub fn elapsed_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

/// Normalized outcome of one execution operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub connection: String,
    pub database: String,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub row_count: u64,
    pub execution_time_ms: f64,
    pub message: String,
    pub statement_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl QueryResult {
    /// Build a success result from an adapter execution
    pub fn success(
        connection: impl Into<String>,
        database: impl Into<String>,
        statement_type: impl Into<String>,
        execution: Execution,
        elapsed: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            connection: connection.into(),
            database: database.into(),
            columns: execution.columns,
            rows: execution.rows,
            row_count: execution.affected,
            execution_time_ms: elapsed_ms(elapsed),
            message: message.into(),
            statement_type: statement_type.into(),
            error: None,
        }
    }

    /// Build a failure result carrying the error's kind and detail
    pub fn failure(
        connection: impl Into<String>,
        database: impl Into<String>,
        statement_type: impl Into<String>,
        err: &SqlGateError,
    ) -> Self {
        Self {
            success: false,
            connection: connection.into(),
            database: database.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 0.0,
            message: err.message(),
            statement_type: statement_type.into(),
            error: Some(err.into()),
        }
    }
}

impl Outcome for QueryResult {
    fn succeeded(&self) -> bool {
        self.success
    }
}

/// Envelope for introspection operations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Introspection<T> {
    pub success: bool,
    pub connection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(flatten)]
    pub data: Option<T>,
    pub execution_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl<T> Introspection<T> {
    pub fn success(
        connection: impl Into<String>,
        database: Option<&str>,
        data: T,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: true,
            connection: connection.into(),
            database: database.map(str::to_string),
            data: Some(data),
            execution_time_ms: elapsed_ms(elapsed),
            message: None,
            error: None,
        }
    }

    pub fn failure(connection: impl Into<String>, database: Option<&str>, err: &SqlGateError) -> Self {
        Self {
            success: false,
            connection: connection.into(),
            database: database.map(str::to_string),
            data: None,
            execution_time_ms: 0.0,
            message: Some(err.message()),
            error: Some(err.into()),
        }
    }
}

impl<T> Outcome for Introspection<T> {
    fn succeeded(&self) -> bool {
        self.success
    }
}

/// `list_databases` data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseList {
    pub databases: Vec<String>,
    pub count: usize,
}

impl DatabaseList {
    #[must_use]
    pub fn new(databases: Vec<String>) -> Self {
        Self { count: databases.len(), databases }
    }
}

/// `list_tables` data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableList {
    pub schema: Option<String>,
    pub tables: Vec<TableEntry>,
    pub count: usize,
}

/// `describe_table` data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnDescription>,
    pub count: usize,
}

/// One table inside a `get_schema` map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub schema: Option<String>,
    pub table: String,
    #[serde(rename = "type")]
    pub table_type: String,
    pub columns: Vec<ColumnDescription>,
    pub col_count: usize,
}

/// `get_schema` data, keyed by `schema.table` (bare table name when no schema is known)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMap {
    pub schema: Option<String>,
    pub tables: BTreeMap<String, SchemaTable>,
    pub table_count: usize,
}

/// `list_connections` data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionList {
    pub connections: Vec<ConnectionSummary>,
    pub count: usize,
}

impl Outcome for ConnectionList {
    fn succeeded(&self) -> bool {
        true
    }
}
