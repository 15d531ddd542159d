//! Connection Registry
//!
//! Holds the named connection configurations and lazily builds one backend adapter per
//! name. The cache lock is held across lookup and construction, so concurrent first
//! requests for a name end up sharing a single adapter. Construction never opens a
//! network connection; sessions are opened on first use by `AdapterSlot::ensure_connected`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{self, BackendAdapter, ConnectionConfig, ConnectionSummary, Driver};
use crate::error::{Result, SqlGateError};

/// Builds an adapter for a connection config
pub type AdapterFactory =
    Arc<dyn Fn(&ConnectionConfig) -> Result<Box<dyn BackendAdapter>> + Send + Sync>;

/// Shared handle to a cached adapter
pub type AdapterHandle = Arc<Mutex<AdapterSlot>>;

/// A cached adapter plus the database its session is currently using
pub struct AdapterSlot {
    config: ConnectionConfig,
    adapter: Box<dyn BackendAdapter>,
    active_database: Option<String>,
}

impl AdapterSlot {
    fn new(config: ConnectionConfig, adapter: Box<dyn BackendAdapter>) -> Self {
        Self { config, adapter, active_database: None }
    }

    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn driver(&self) -> Driver {
        self.adapter.driver()
    }

    /// Database the live session is using, if known
    #[must_use]
    pub fn active_database(&self) -> Option<&str> {
        self.active_database.as_deref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    pub fn adapter(&mut self) -> &mut dyn BackendAdapter {
        self.adapter.as_mut()
    }

    /// Open the session if it is absent; a fresh session starts on the default database
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if !self.adapter.is_connected() {
            self.adapter.connect().await?;
            self.active_database = self.config.default_database().map(str::to_string);
        }
        Ok(())
    }

    /// Point the session at `database`, or back at the configured default
    ///
    /// Issues the driver's switch statement only when the target differs from the
    /// session's current database.
    pub async fn use_database(&mut self, database: Option<&str>) -> Result<()> {
        self.ensure_connected().await?;

        let Some(target) = database.or_else(|| self.config.default_database()) else {
            return Ok(());
        };
        if self.active_database.as_deref() == Some(target) {
            return Ok(());
        }

        let switch = self.adapter.driver().switch_statement(target);
        debug!(connection = %self.config.name, database = target, "switching database");
        self.adapter.execute(&switch, &[]).await?;
        self.active_database = Some(target.to_string());
        Ok(())
    }

    /// Roll back after a failed execution
    ///
    /// When the rollback itself fails the session is dropped, so the next use reconnects.
    pub async fn recover(&mut self) {
        if let Err(err) = self.adapter.rollback().await {
            warn!(connection = %self.config.name, error = %err, "rollback failed, dropping session");
            self.disconnect().await;
        }
    }

    /// Close the session if one is held
    pub async fn disconnect(&mut self) {
        if !self.adapter.is_connected() {
            return;
        }
        if let Err(err) = self.adapter.disconnect().await {
            warn!(connection = %self.config.name, error = %err, "disconnect failed");
        }
        self.active_database = None;
    }
}

/// Named connection configs and their lazily built adapters
pub struct ConnectionRegistry {
    configs: BTreeMap<String, ConnectionConfig>,
    factory: AdapterFactory,
    adapters: Mutex<HashMap<String, AdapterHandle>>,
}

impl ConnectionRegistry {
    /// Registry building adapters by driver
    pub fn new(configs: impl IntoIterator<Item = ConnectionConfig>) -> Self {
        Self::with_factory(configs, engine::create_adapter)
    }

    /// Registry building adapters with a custom factory
    pub fn with_factory<F>(configs: impl IntoIterator<Item = ConnectionConfig>, factory: F) -> Self
    where
        F: Fn(&ConnectionConfig) -> Result<Box<dyn BackendAdapter>> + Send + Sync + 'static,
    {
        Self {
            configs: configs.into_iter().map(|c| (c.name.clone(), c)).collect(),
            factory: Arc::new(factory),
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// Config for a connection name
    #[must_use]
    pub fn config(&self, connection_name: &str) -> Option<&ConnectionConfig> {
        self.configs.get(connection_name)
    }

    /// Cached adapter for the name, built on first request
    pub async fn get_adapter(&self, connection_name: &str) -> Result<AdapterHandle> {
        let mut adapters = self.adapters.lock().await;
        if let Some(handle) = adapters.get(connection_name) {
            return Ok(Arc::clone(handle));
        }

        let config = self.configs.get(connection_name).ok_or_else(|| {
            SqlGateError::connection_failed(
                connection_name,
                format!("Unknown connection. Available: {:?}", self.configs.keys().collect::<Vec<_>>()),
            )
        })?;

        let adapter = (self.factory)(config)?;
        info!(connection = connection_name, driver = %config.driver, "adapter created");

        let handle = Arc::new(Mutex::new(AdapterSlot::new(config.clone(), adapter)));
        adapters.insert(connection_name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Summary of every configured connection; never connects
    #[must_use]
    pub fn list_connections(&self) -> Vec<ConnectionSummary> {
        self.configs.values().map(ConnectionConfig::summary).collect()
    }

    /// Number of adapters currently cached
    pub async fn cached_adapters(&self) -> usize {
        self.adapters.lock().await.len()
    }

    /// Close every live session, then empty the cache
    pub async fn disconnect_all(&self) {
        let mut adapters = self.adapters.lock().await;
        for (name, handle) in adapters.drain() {
            let mut slot = handle.lock().await;
            if slot.is_connected() {
                slot.disconnect().await;
                info!(connection = %name, "adapter disconnected");
            }
        }
    }
}
