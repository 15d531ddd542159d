//! MCP (Model Context Protocol) Server
//!
//! This module implements an MCP server using manual JSON-RPC 2.0 over stdio.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (line-based)
//! - **Dependencies**: Only `serde_json`, `tokio` and anyhow (no MCP-specific crates)
//! - **State**: One [`Orchestrator`] shared by every call; sessions stay open between calls
//!
//! # MCP Tools
//!
//! - `execute_query` - SELECT only
//! - `execute_statement` - INSERT, UPDATE, CREATE, ALTER, MERGE
//! - `delete_statement` - DELETE with a WHERE clause
//! - `drop_statement` - DROP only
//! - `list_databases`, `list_tables`, `describe_table`, `get_schema` - allowlist-filtered introspection
//! - `list_connections` - configured connection names, no credentials
//!
//! # Usage
//!
//! Start the MCP server with: `sqlgate serve`
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "sqlgate": {
//!       "command": "sqlgate",
//!       "args": ["serve"]
//!     }
//!   }
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::error::SqlGateError;
use crate::orchestrator::Orchestrator;
use crate::output::{ErrorInfo, Outcome};

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INTERNAL_ERROR: i32 = -32603;

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

/// Text content block for MCP tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

impl TextContent {
    fn new(text: String) -> Self {
        Self { content_type: "text".to_string(), text }
    }
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    /// Wrap an operation result; `isError` mirrors its `success` flag
    fn from_outcome<T: Serialize + Outcome>(data: &T) -> Result<Value> {
        let json_text = serde_json::to_string_pretty(data)?;
        let result =
            Self { content: vec![TextContent::new(json_text)], is_error: !data.succeeded() };
        Ok(serde_json::to_value(result)?)
    }

    /// Tool-level failure before any operation ran (malformed arguments)
    fn invalid_input(err: &SqlGateError) -> Result<Value> {
        let body = serde_json::json!({ "success": false, "error": ErrorInfo::from(err) });
        let result = Self {
            content: vec![TextContent::new(serde_json::to_string_pretty(&body)?)],
            is_error: true,
        };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// Tool Arguments
// ============================================================================

/// Arguments shared by the four execution tools
#[derive(Debug, Deserialize)]
struct SqlArgs {
    #[serde(alias = "connection")]
    connection_name: String,
    sql: String,
    #[serde(default)]
    database: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionArgs {
    #[serde(alias = "connection")]
    connection_name: String,
}

/// `list_tables` and `get_schema`
#[derive(Debug, Deserialize)]
struct DatabaseArgs {
    #[serde(alias = "connection")]
    connection_name: String,
    database: String,
    #[serde(default)]
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeArgs {
    #[serde(alias = "connection")]
    connection_name: String,
    database: String,
    table: String,
    #[serde(default)]
    schema: Option<String>,
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Option<&Value>) -> std::result::Result<T, SqlGateError> {
    let arguments = arguments.cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(arguments)
        .map_err(|e| SqlGateError::invalid_input(format!("Invalid arguments for '{tool}': {e}")))
}

// ============================================================================
// MCP Server
// ============================================================================

/// Start the MCP server on stdin/stdout
///
/// Runs until stdin closes, then disconnects every cached adapter.
///
/// # Errors
///
/// Returns an error if stdio communication fails.
pub async fn serve(orchestrator: &Orchestrator) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_io(orchestrator, stdin, stdout).await
}

/// Serve newline-delimited JSON-RPC from `reader`, writing responses to `writer`
///
/// # Protocol
///
/// - Each request is a single line of JSON
/// - Each response is a single line of JSON
/// - Notifications (`notifications/*`) get no response
pub async fn serve_io<R, W>(orchestrator: &Orchestrator, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("MCP server listening on stdio");
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = handle_line(orchestrator, &line).await else {
            continue;
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    info!("stdin closed, shutting down");
    orchestrator.shutdown().await;
    Ok(())
}

/// Handle one raw request line; `None` for notifications
async fn handle_line(orchestrator: &Orchestrator, line: &str) -> Option<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Some(JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {e}"))),
    };

    if request.method.starts_with("notifications/") {
        debug!(method = %request.method, "notification ignored");
        return None;
    }

    Some(handle_request(orchestrator, request).await)
}

/// Routes the request to the appropriate handler based on the method name.
async fn handle_request(orchestrator: &Orchestrator, request: JsonRpcRequest) -> JsonRpcResponse {
    let result = match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "tools/list" => Ok(handle_list_tools()),
        "tools/call" => handle_call_tool(orchestrator, request.params).await,
        other => {
            return JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Unknown method: {other}"),
            )
        }
    };

    match result {
        Ok(value) => JsonRpcResponse::result(request.id, value),
        Err(e) => JsonRpcResponse::error(request.id, INTERNAL_ERROR, e.to_string()),
    }
}

// ============================================================================
// MCP Protocol Handlers
// ============================================================================

fn handle_initialize() -> Value {
    serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "sqlgate",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn sql_tool(name: &str, description: &str) -> Value {
    serde_json::json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "connection_name": { "type": "string", "description": "Name of a configured connection" },
                "sql": { "type": "string", "description": "A single SQL statement" },
                "database": { "type": "string", "description": "Database to run against (must be allowlisted). Defaults to the connection's database." }
            },
            "required": ["connection_name", "sql"]
        }
    })
}

/// Returns the list of available MCP tools with their schemas.
fn handle_list_tools() -> Value {
    serde_json::json!({
        "tools": [
            sql_tool(
                "execute_query",
                "Execute a read-only SELECT query against a named connection. Returns column metadata, rows, row count and timing."
            ),
            sql_tool(
                "execute_statement",
                "Execute a write statement (INSERT, UPDATE, CREATE, ALTER, MERGE). DELETE, DROP and TRUNCATE are blocked here; use the dedicated tools."
            ),
            sql_tool(
                "delete_statement",
                "Execute a DELETE statement. A WHERE clause is required; bare DELETE is rejected."
            ),
            sql_tool(
                "drop_statement",
                "Execute a DROP statement. Irreversible; use with care."
            ),
            {
                "name": "list_databases",
                "description": "List databases on a connection, filtered to the allowlist.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "connection_name": { "type": "string", "description": "Name of a configured connection" }
                    },
                    "required": ["connection_name"]
                }
            },
            {
                "name": "list_tables",
                "description": "List tables in an allowlisted database, optionally filtered by schema.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "connection_name": { "type": "string", "description": "Name of a configured connection" },
                        "database": { "type": "string" },
                        "schema": { "type": "string", "description": "Optional schema filter" }
                    },
                    "required": ["connection_name", "database"]
                }
            },
            {
                "name": "describe_table",
                "description": "Column metadata for one table: name, type, nullable, max_length, default, position.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "connection_name": { "type": "string", "description": "Name of a configured connection" },
                        "database": { "type": "string" },
                        "table": { "type": "string" },
                        "schema": { "type": "string" }
                    },
                    "required": ["connection_name", "database", "table"]
                }
            },
            {
                "name": "get_schema",
                "description": "All tables and their columns for a database (optionally one schema). Can be large; prefer describe_table for targeted lookups.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "connection_name": { "type": "string", "description": "Name of a configured connection" },
                        "database": { "type": "string" },
                        "schema": { "type": "string" }
                    },
                    "required": ["connection_name", "database"]
                }
            },
            {
                "name": "list_connections",
                "description": "List configured connection names with driver, host and default database. Never connects.",
                "inputSchema": { "type": "object", "properties": {} }
            }
        ]
    })
}

/// Routes the tool call to the orchestrator operation.
async fn handle_call_tool(orchestrator: &Orchestrator, params: Option<Value>) -> Result<Value> {
    let params = params.ok_or_else(|| anyhow!("Missing params"))?;
    let name = params["name"].as_str().ok_or_else(|| anyhow!("Missing tool name"))?;
    let arguments = params.get("arguments");
    debug!(tool = name, "tool call");

    match call_tool(orchestrator, name, arguments).await {
        Ok(value) => Ok(value),
        Err(ToolError::InvalidInput(err)) => CallToolResult::invalid_input(&err),
        Err(ToolError::Protocol(err)) => Err(err),
    }
}

enum ToolError {
    InvalidInput(SqlGateError),
    Protocol(anyhow::Error),
}

impl From<SqlGateError> for ToolError {
    fn from(err: SqlGateError) -> Self {
        Self::InvalidInput(err)
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        Self::Protocol(err)
    }
}

async fn call_tool(
    orchestrator: &Orchestrator,
    name: &str,
    arguments: Option<&Value>,
) -> std::result::Result<Value, ToolError> {
    let value = match name {
        "execute_query" | "execute_statement" | "delete_statement" | "drop_statement" => {
            let args: SqlArgs = parse_args(name, arguments)?;
            let (conn, sql, db) = (&args.connection_name, &args.sql, args.database.as_deref());
            let result = match name {
                "execute_query" => orchestrator.execute_query(conn, sql, db).await,
                "execute_statement" => orchestrator.execute_statement(conn, sql, db).await,
                "delete_statement" => orchestrator.delete_statement(conn, sql, db).await,
                _ => orchestrator.drop_statement(conn, sql, db).await,
            };
            CallToolResult::from_outcome(&result)?
        }
        "list_databases" => {
            let args: ConnectionArgs = parse_args(name, arguments)?;
            CallToolResult::from_outcome(&orchestrator.list_databases(&args.connection_name).await)?
        }
        "list_tables" => {
            let args: DatabaseArgs = parse_args(name, arguments)?;
            let result = orchestrator
                .list_tables(&args.connection_name, &args.database, args.schema.as_deref())
                .await;
            CallToolResult::from_outcome(&result)?
        }
        "describe_table" => {
            let args: DescribeArgs = parse_args(name, arguments)?;
            let result = orchestrator
                .describe_table(&args.connection_name, &args.database, &args.table, args.schema.as_deref())
                .await;
            CallToolResult::from_outcome(&result)?
        }
        "get_schema" => {
            let args: DatabaseArgs = parse_args(name, arguments)?;
            let result = orchestrator
                .get_schema(&args.connection_name, &args.database, args.schema.as_deref())
                .await;
            CallToolResult::from_outcome(&result)?
        }
        "list_connections" => CallToolResult::from_outcome(&orchestrator.list_connections())?,
        _ => return Err(anyhow!("Unknown tool: {name}").into()),
    };
    Ok(value)
}
