//! In-memory backend shared by the integration tests
//!
//! Every adapter built by [`FakeBackend::registry`] records its calls into the same
//! [`Journal`], so tests can assert what reached the "database" (and what never did).

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sqlgate::{
    AllowedTarget, Allowlist, BackendAdapter, ColumnDescription, ColumnMeta, ConnectionConfig,
    ConnectionRegistry, Driver, Execution, Orchestrator, Result, Row, SqlGateError, SqlParam,
    TableEntry,
};

/// Everything the fake database has seen
#[derive(Debug, Default)]
pub struct Journal {
    pub built: usize,
    pub connects: usize,
    pub disconnects: usize,
    pub rollbacks: usize,
    pub executed: Vec<String>,
}

/// Canned responses plus the journal
#[derive(Default)]
pub struct FakeData {
    pub databases: Vec<String>,
    pub tables: Vec<TableEntry>,
    pub columns: BTreeMap<String, Vec<ColumnDescription>>,
    pub result: Execution,
    /// Statements containing this text fail
    pub fail_on: Option<String>,
    pub fail_rollback: bool,
    pub fail_connect: bool,
    pub journal: Journal,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    data: Arc<Mutex<FakeData>>,
    live: Arc<AtomicUsize>,
}

impl FakeBackend {
    /// Backend with a small `shop` catalogue
    pub fn shop() -> Self {
        let backend = Self::default();
        {
            let mut data = backend.data();
            data.databases = vec!["shop".into(), "archive".into(), "internal".into()];
            data.tables = vec![
                table(Some("dbo"), "orders"),
                table(Some("dbo"), "users"),
                table(Some("audit"), "log"),
            ];
            data.columns.insert(
                "orders".into(),
                vec![column("id", "int", false, 1), column("total", "decimal", true, 2)],
            );
            data.columns.insert(
                "users".into(),
                vec![column("id", "int", false, 1), column("email", "varchar", true, 2)],
            );
            data.columns.insert("log".into(), vec![column("entry", "text", true, 1)]);

            let mut row = Row::new();
            row.insert("id".into(), serde_json::json!(1));
            row.insert("email".into(), serde_json::json!("a@example.com"));
            data.result = Execution {
                columns: vec![ColumnMeta::new("id", "INT", false), ColumnMeta::new("email", "VARCHAR", true)],
                rows: vec![row],
                affected: 1,
            };
        }
        backend
    }

    pub fn data(&self) -> MutexGuard<'_, FakeData> {
        self.data.lock().unwrap()
    }

    /// Adapters currently holding a live session
    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Registry whose adapters all talk to this backend
    pub fn registry(&self, configs: Vec<ConnectionConfig>) -> ConnectionRegistry {
        let backend = self.clone();
        ConnectionRegistry::with_factory(configs, move |config| {
            backend.data().journal.built += 1;
            Ok(Box::new(FakeAdapter { backend: backend.clone(), driver: config.driver, connected: false }))
        })
    }

    /// Orchestrator over the standard test connections and policy
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.registry(connections()), allowlist())
    }
}

pub struct FakeAdapter {
    backend: FakeBackend,
    driver: Driver,
    connected: bool,
}

#[async_trait]
impl BackendAdapter for FakeAdapter {
    fn driver(&self) -> Driver {
        self.driver
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<()> {
        let mut data = self.backend.data();
        if data.fail_connect {
            return Err(SqlGateError::connection_failed("fake", "refused"));
        }
        data.journal.connects += 1;
        self.connected = true;
        self.backend.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.backend.data().journal.disconnects += 1;
            self.backend.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.connected = false;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, _params: &[SqlParam]) -> Result<Execution> {
        let mut data = self.backend.data();
        data.journal.executed.push(sql.to_string());
        if sql.starts_with("USE ") {
            return Ok(Execution::default());
        }
        if data.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
            return Err(SqlGateError::query_failed("constraint violation"));
        }
        Ok(data.result.clone())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut data = self.backend.data();
        data.journal.rollbacks += 1;
        if data.fail_rollback {
            return Err(SqlGateError::query_failed("rollback failed"));
        }
        Ok(())
    }

    async fn get_databases(&mut self) -> Result<Vec<String>> {
        Ok(self.backend.data().databases.clone())
    }

    async fn get_tables(&mut self, _database: &str, schema: Option<&str>) -> Result<Vec<TableEntry>> {
        let data = self.backend.data();
        Ok(data
            .tables
            .iter()
            .filter(|t| schema.is_none() || t.schema.as_deref() == schema)
            .cloned()
            .collect())
    }

    async fn describe_table(
        &mut self,
        _database: &str,
        table: &str,
        _schema: Option<&str>,
    ) -> Result<Vec<ColumnDescription>> {
        Ok(self.backend.data().columns.get(table).cloned().unwrap_or_default())
    }
}

pub fn table(schema: Option<&str>, name: &str) -> TableEntry {
    TableEntry {
        schema: schema.map(str::to_string),
        table: name.to_string(),
        table_type: "BASE TABLE".to_string(),
    }
}

pub fn column(name: &str, data_type: &str, nullable: bool, position: u32) -> ColumnDescription {
    ColumnDescription {
        column: name.to_string(),
        data_type: data_type.to_string(),
        nullable,
        max_length: None,
        default: None,
        position,
    }
}

/// `shop` (mysql, default db `shop`), `warehouse` (sql_server, no default), `orphan` (no policy)
pub fn connections() -> Vec<ConnectionConfig> {
    vec![
        ConnectionConfig::new("shop", Driver::MySql, "localhost").with_database("shop"),
        ConnectionConfig::new("warehouse", Driver::SqlServer, "db.internal"),
        ConnectionConfig::new("orphan", Driver::MySql, "localhost").with_database("shop"),
    ]
}

pub fn allowlist() -> Allowlist {
    Allowlist::new([
        AllowedTarget::new("shop", vec!["shop".into(), "archive".into()], vec!["*".into()]),
        AllowedTarget::new("warehouse", vec![], vec!["dbo".into()]),
    ])
}
