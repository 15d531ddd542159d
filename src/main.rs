//! SQLGate CLI Entry Point
//!
//! Subcommands:
//! - `serve` - MCP server over stdio
//! - `connections` - list configured connections
//! - `query` / `statement` / `delete` / `drop` - gated SQL execution
//! - `databases` / `tables` / `describe` / `schema` - allowlist-filtered introspection
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::error;

use sqlgate::output::Outcome;
use sqlgate::{config, logging, mcp, ConnectionRegistry, Orchestrator, SqlGateError};

/// SQLGate - allowlist-gated SQL execution for automated callers
#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(about = "Allowlist-gated SQL execution for automated database callers")]
#[command(version)]
struct Cli {
    /// Config file to use instead of the global/local files
    #[arg(long, global = true, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Connection and target for SQL subcommands
#[derive(Args)]
struct SqlTarget {
    /// Connection name
    #[arg(short, long)]
    connection: String,

    /// Database to run against (defaults to the connection's database)
    #[arg(short, long)]
    database: Option<String>,

    /// A single SQL statement
    sql: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server over stdio
    Serve,

    /// List configured connections (never connects)
    Connections,

    /// Execute a SELECT
    Query(SqlTarget),

    /// Execute INSERT, UPDATE, CREATE, ALTER or MERGE
    Statement(SqlTarget),

    /// Execute a DELETE with a WHERE clause
    Delete(SqlTarget),

    /// Execute a DROP
    Drop(SqlTarget),

    /// List allowed databases
    Databases {
        #[arg(short, long)]
        connection: String,
    },

    /// List tables in a database
    Tables {
        #[arg(short, long)]
        connection: String,
        #[arg(short, long)]
        database: String,
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Describe one table's columns
    Describe {
        #[arg(short, long)]
        connection: String,
        #[arg(short, long)]
        database: String,
        #[arg(short, long)]
        schema: Option<String>,
        table: String,
    },

    /// Every table with its columns
    Schema {
        #[arg(short, long)]
        connection: String,
        #[arg(short, long)]
        database: String,
        #[arg(short, long)]
        schema: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose, cli.quiet) {
        eprintln!("{e}");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            let code =
                e.downcast_ref::<SqlGateError>().map_or("INTERNAL_ERROR", SqlGateError::error_code);
            let body = serde_json::json!({
                "success": false,
                "error": { "code": code, "message": format!("{e:#}") }
            });
            println!("{body:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let resolved = config::load(cli.config.as_deref()).context("Could not load configuration")?;
    let orchestrator =
        Orchestrator::new(ConnectionRegistry::new(resolved.connections), resolved.allowlist);

    let outcome = dispatch(&orchestrator, cli.command, &mut io::stdout()).await;
    orchestrator.shutdown().await;
    outcome
}

/// Run one subcommand, writing its JSON result to `out`
async fn dispatch(orchestrator: &Orchestrator, command: Commands, out: &mut impl Write) -> Result<ExitCode> {
    match command {
        Commands::Serve => {
            mcp::serve(orchestrator).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Connections => emit(out, &orchestrator.list_connections()),
        Commands::Query(t) => {
            emit(out, &orchestrator.execute_query(&t.connection, &t.sql, t.database.as_deref()).await)
        }
        Commands::Statement(t) => {
            emit(out, &orchestrator.execute_statement(&t.connection, &t.sql, t.database.as_deref()).await)
        }
        Commands::Delete(t) => {
            emit(out, &orchestrator.delete_statement(&t.connection, &t.sql, t.database.as_deref()).await)
        }
        Commands::Drop(t) => {
            emit(out, &orchestrator.drop_statement(&t.connection, &t.sql, t.database.as_deref()).await)
        }
        Commands::Databases { connection } => emit(out, &orchestrator.list_databases(&connection).await),
        Commands::Tables { connection, database, schema } => {
            emit(out, &orchestrator.list_tables(&connection, &database, schema.as_deref()).await)
        }
        Commands::Describe { connection, database, schema, table } => emit(
            out,
            &orchestrator.describe_table(&connection, &database, &table, schema.as_deref()).await,
        ),
        Commands::Schema { connection, database, schema } => {
            emit(out, &orchestrator.get_schema(&connection, &database, schema.as_deref()).await)
        }
    }
}

/// Write the result as pretty JSON and map `success` to the exit code
fn emit<T: Serialize + Outcome>(out: &mut impl Write, result: &T) -> Result<ExitCode> {
    serde_json::to_writer_pretty(&mut *out, result)?;
    writeln!(out)?;
    Ok(if result.succeeded() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
