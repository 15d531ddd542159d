//! SQLGate - Allowlist-Gated SQL Execution
//!
//! SQLGate sits between an automated caller and one or more relational database servers.
//! Callers submit raw SQL plus a named connection (and optionally a database); SQLGate
//! classifies the statement, checks it against the operation's permitted kinds, checks the
//! target database/schema against a per-connection allowlist, routes it to a pooled
//! backend adapter, and returns a normalized JSON result.
//!
//! # Core Principles
//! - Deny by default: no allowlist entry means no access
//! - Gates run before any network call
//! - One statement per request
//! - Failures are results (`success: false`), never raw faults
//!
//! # Module Organization
//! - [`error`] - Error types and codes
//! - [`capability`] - Statement classification and path gates
//! - [`allowlist`] - Per-connection database/schema policy
//! - [`engine`] - Backend adapter trait and the MySQL / SQL Server adapters
//! - [`registry`] - Lazily built, cached adapters per connection name
//! - [`orchestrator`] - The exposed operations
//! - [`output`] - JSON result shapes
//! - [`config`] - Configuration loading and validation
//! - [`logging`] - stderr tracing setup
//! - [`mcp`] - MCP server (JSON-RPC 2.0 over stdio)

pub mod allowlist;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod orchestrator;
pub mod output;
pub mod registry;

pub use allowlist::{AllowedTarget, Allowlist};
pub use capability::{classify, count_statements, count_statements_for, StatementPath, StatementType};
pub use engine::{
    BackendAdapter, ColumnDescription, ColumnMeta, ConnectionConfig, ConnectionSummary, Driver,
    Execution, Row, SqlParam, TableEntry,
};
pub use error::{Result, SqlGateError};
pub use orchestrator::Orchestrator;
pub use output::{ErrorInfo, Introspection, QueryResult};
pub use registry::{AdapterHandle, ConnectionRegistry};
