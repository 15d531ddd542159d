//! Operation Orchestrator
//!
//! Every exposed operation runs the same fixed sequence:
//! 1. caller SQL: multi-statement check under the connection's driver, then the path's gate
//! 2. requested database/schema: allowlist validation, before any adapter is touched
//! 3. adapter from the registry, session pointed at the requested (or default) database
//! 4. the adapter primitive, timed
//! 5. normalization; any failure from steps 1-4 becomes a `success: false` result
//!
//! Listing operations filter what they return by the allowlist instead of failing.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{info, warn};

use crate::allowlist::Allowlist;
use crate::capability::{classify, StatementPath, StatementType};
use crate::engine::{Execution, TableEntry};
use crate::error::{Result, SqlGateError};
use crate::output::{
    ConnectionList, DatabaseList, Introspection, QueryResult, SchemaMap, SchemaTable,
    TableDescription, TableList,
};
use crate::registry::ConnectionRegistry;

/// Explicitly constructed context shared by every operation
pub struct Orchestrator {
    registry: ConnectionRegistry,
    allowlist: Allowlist,
}

impl Orchestrator {
    #[must_use]
    pub const fn new(registry: ConnectionRegistry, allowlist: Allowlist) -> Self {
        Self { registry, allowlist }
    }

    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Read-only execution: SELECT only
    pub async fn execute_query(&self, connection: &str, sql: &str, database: Option<&str>) -> QueryResult {
        self.run_sql(StatementPath::Query, connection, sql, database).await
    }

    /// General write/DDL execution; DELETE, DROP and TRUNCATE are blocked
    pub async fn execute_statement(
        &self,
        connection: &str,
        sql: &str,
        database: Option<&str>,
    ) -> QueryResult {
        self.run_sql(StatementPath::Statement, connection, sql, database).await
    }

    /// DELETE with a WHERE clause
    pub async fn delete_statement(&self, connection: &str, sql: &str, database: Option<&str>) -> QueryResult {
        self.run_sql(StatementPath::Delete, connection, sql, database).await
    }

    /// DROP only
    pub async fn drop_statement(&self, connection: &str, sql: &str, database: Option<&str>) -> QueryResult {
        self.run_sql(StatementPath::Drop, connection, sql, database).await
    }

    /// Databases visible on the connection, narrowed to the allowlist when one is set
    pub async fn list_databases(&self, connection: &str) -> Introspection<DatabaseList> {
        let started = Instant::now();
        let outcome = self.try_list_databases(connection).await;
        finish_introspection("list_databases", connection, None, started, outcome)
    }

    /// Tables in an allowed database (and schema, if given)
    pub async fn list_tables(
        &self,
        connection: &str,
        database: &str,
        schema: Option<&str>,
    ) -> Introspection<TableList> {
        let started = Instant::now();
        let outcome = self.try_list_tables(connection, database, schema).await;
        finish_introspection("list_tables", connection, Some(database), started, outcome)
    }

    /// Ordered column descriptions for one table
    pub async fn describe_table(
        &self,
        connection: &str,
        database: &str,
        table: &str,
        schema: Option<&str>,
    ) -> Introspection<TableDescription> {
        let started = Instant::now();
        let outcome = self.try_describe_table(connection, database, table, schema).await;
        finish_introspection("describe_table", connection, Some(database), started, outcome)
    }

    /// Every table with its columns, keyed by `schema.table`
    pub async fn get_schema(
        &self,
        connection: &str,
        database: &str,
        schema: Option<&str>,
    ) -> Introspection<SchemaMap> {
        let started = Instant::now();
        let outcome = self.try_get_schema(connection, database, schema).await;
        finish_introspection("get_schema", connection, Some(database), started, outcome)
    }

    /// Configured connections; never connects
    #[must_use]
    pub fn list_connections(&self) -> ConnectionList {
        let connections = self.registry.list_connections();
        ConnectionList { count: connections.len(), connections }
    }

    /// Close every live session
    pub async fn shutdown(&self) {
        self.registry.disconnect_all().await;
    }

    async fn run_sql(
        &self,
        path: StatementPath,
        connection: &str,
        sql: &str,
        database: Option<&str>,
    ) -> QueryResult {
        let operation = path.operation();
        match self.try_run_sql(path, connection, sql, database).await {
            Ok(result) => {
                info!(
                    operation,
                    connection,
                    statement_type = %result.statement_type,
                    row_count = result.row_count,
                    execution_time_ms = result.execution_time_ms,
                    "operation succeeded"
                );
                result
            }
            Err(err) => {
                warn!(operation, connection, code = err.error_code(), error = %err, "operation failed");
                let statement_type = match &err {
                    SqlGateError::ValidationFailed { statement_type, .. } => statement_type.clone(),
                    _ => classify(sql).as_str().to_string(),
                };
                let database = database
                    .map(str::to_string)
                    .or_else(|| self.registry.config(connection).map(|c| c.database.clone()))
                    .unwrap_or_default();
                QueryResult::failure(connection, database, statement_type, &err)
            }
        }
    }

    async fn try_run_sql(
        &self,
        path: StatementPath,
        connection: &str,
        sql: &str,
        database: Option<&str>,
    ) -> Result<QueryResult> {
        let driver = self.registry.config(connection).map(|c| c.driver);
        let statement_type = path.check(sql, driver)?;
        if let Some(database) = database {
            self.allowlist.validate_database(connection, database)?;
        }

        let handle = self.registry.get_adapter(connection).await?;
        let mut slot = handle.lock().await;
        slot.use_database(database).await?;
        let database = slot.active_database().unwrap_or_default().to_string();

        let started = Instant::now();
        let execution = match slot.adapter().execute(sql, &[]).await {
            Ok(execution) => execution,
            Err(err) => {
                slot.recover().await;
                return Err(err);
            }
        };
        let elapsed = started.elapsed();

        let message = success_message(path, statement_type, &execution);
        Ok(QueryResult::success(connection, database, statement_type.as_str(), execution, elapsed, message))
    }

    async fn try_list_databases(&self, connection: &str) -> Result<DatabaseList> {
        let handle = self.registry.get_adapter(connection).await?;
        let mut slot = handle.lock().await;
        slot.ensure_connected().await?;
        let mut databases = slot.adapter().get_databases().await?;

        let allowed = self.allowlist.get_allowed_databases(connection);
        if !allowed.is_empty() {
            databases.retain(|db| allowed.contains(db));
        }
        Ok(DatabaseList::new(databases))
    }

    async fn try_list_tables(
        &self,
        connection: &str,
        database: &str,
        schema: Option<&str>,
    ) -> Result<TableList> {
        let tables = self.allowed_tables(connection, database, schema).await?;
        Ok(TableList { schema: schema.map(str::to_string), count: tables.len(), tables })
    }

    async fn try_describe_table(
        &self,
        connection: &str,
        database: &str,
        table: &str,
        schema: Option<&str>,
    ) -> Result<TableDescription> {
        self.validate_target(connection, database, schema)?;

        let handle = self.registry.get_adapter(connection).await?;
        let mut slot = handle.lock().await;
        slot.ensure_connected().await?;
        let columns = slot.adapter().describe_table(database, table, schema).await?;

        Ok(TableDescription {
            table: table.to_string(),
            schema: schema.map(str::to_string),
            count: columns.len(),
            columns,
        })
    }

    async fn try_get_schema(
        &self,
        connection: &str,
        database: &str,
        schema: Option<&str>,
    ) -> Result<SchemaMap> {
        let entries = self.allowed_tables(connection, database, schema).await?;

        let handle = self.registry.get_adapter(connection).await?;
        let mut slot = handle.lock().await;
        let mut tables = BTreeMap::new();
        for entry in entries {
            let columns = slot
                .adapter()
                .describe_table(database, &entry.table, entry.schema.as_deref())
                .await?;
            tables.insert(
                schema_key(entry.schema.as_deref(), &entry.table),
                SchemaTable {
                    col_count: columns.len(),
                    columns,
                    schema: entry.schema,
                    table: entry.table,
                    table_type: entry.table_type,
                },
            );
        }

        Ok(SchemaMap { schema: schema.map(str::to_string), table_count: tables.len(), tables })
    }

    /// Validated table listing, filtered to allowed schemas when no schema was requested
    async fn allowed_tables(
        &self,
        connection: &str,
        database: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableEntry>> {
        self.validate_target(connection, database, schema)?;

        let handle = self.registry.get_adapter(connection).await?;
        let mut slot = handle.lock().await;
        slot.ensure_connected().await?;
        let mut tables = slot.adapter().get_tables(database, schema).await?;

        if schema.is_none() {
            tables.retain(|t| self.allowlist.shows_schema(connection, t.schema.as_deref()));
        }
        Ok(tables)
    }

    fn validate_target(&self, connection: &str, database: &str, schema: Option<&str>) -> Result<()> {
        self.allowlist.validate_database(connection, database)?;
        if let Some(schema) = schema {
            self.allowlist.validate_schema(connection, schema)?;
        }
        Ok(())
    }
}

/// Map key for a table: `schema.table`, or the bare name when no schema is known
#[must_use]
pub fn schema_key(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) if !schema.is_empty() => format!("{schema}.{table}"),
        _ => table.to_string(),
    }
}

fn success_message(path: StatementPath, statement_type: StatementType, execution: &Execution) -> String {
    match path {
        StatementPath::Query => format!("Query returned {} row(s).", execution.affected),
        StatementPath::Statement => {
            format!("{statement_type} executed successfully. {} row(s) affected.", execution.affected)
        }
        StatementPath::Delete => format!("DELETE executed. {} row(s) deleted.", execution.affected),
        StatementPath::Drop => "DROP executed successfully.".to_string(),
    }
}

fn finish_introspection<T>(
    operation: &str,
    connection: &str,
    database: Option<&str>,
    started: Instant,
    outcome: Result<T>,
) -> Introspection<T> {
    match outcome {
        Ok(data) => {
            info!(operation, connection, "operation succeeded");
            Introspection::success(connection, database, data, started.elapsed())
        }
        Err(err) => {
            warn!(operation, connection, code = err.error_code(), error = %err, "operation failed");
            Introspection::failure(connection, database, &err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_key() {
        assert_eq!(schema_key(Some("dbo"), "users"), "dbo.users");
        assert_eq!(schema_key(None, "users"), "users");
        assert_eq!(schema_key(Some(""), "users"), "users");
    }

    #[test]
    fn test_success_messages() {
        let execution = Execution { affected: 3, ..Execution::default() };
        assert_eq!(
            success_message(StatementPath::Statement, StatementType::Update, &execution),
            "UPDATE executed successfully. 3 row(s) affected."
        );
        assert_eq!(
            success_message(StatementPath::Delete, StatementType::Delete, &execution),
            "DELETE executed. 3 row(s) deleted."
        );
        assert_eq!(
            success_message(StatementPath::Query, StatementType::Select, &execution),
            "Query returned 3 row(s)."
        );
    }
}
