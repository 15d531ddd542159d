//! Configuration Management
//!
//! This module loads named connection configurations and their allowlist policy.
//!
//! # Configuration Locations
//! - Explicit: `--config <path>` or `SQLGATE_CONFIG` (used alone)
//! - Global: `<user config dir>/sqlgate/config.json` (per-user)
//! - Local: `.sqlgate/config.json` (team-shareable, per-project)
//!
//! # Resolution Precedence
//! 1. Explicit path, when given (must exist)
//! 2. Local config entries override global entries with the same connection name
//!
//! # File Format
//! ```json
//! {
//!   "connections": {
//!     "warehouse": { "driver": "sql_server", "host": "db.internal", "database": "sales" }
//!   },
//!   "allowlist": {
//!     "warehouse": { "databases": ["sales"], "schemas": ["dbo"] }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::allowlist::{AllowedTarget, Allowlist, WILDCARD};
use crate::engine::{ConnectionConfig, Driver};
use crate::error::{Result, SqlGateError};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "SQLGATE_CONFIG";

/// Whole configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Named connections
    #[serde(default)]
    pub connections: BTreeMap<String, StoredConnection>,

    /// Per-connection policy
    #[serde(default)]
    pub allowlist: BTreeMap<String, AllowlistEntry>,
}

/// Stored connection configuration
///
/// Similar to `ConnectionConfig` but keeps the driver as written and supports an
/// environment variable reference for the password.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredConnection {
    pub driver: String,

    #[serde(default)]
    pub host: String,

    /// Driver default when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name for password (if not storing password directly)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    #[serde(default)]
    pub trusted_connection: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Any other key (driver-specific options)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl fmt::Debug for StoredConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredConnection")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_env", &self.password_env)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

impl StoredConnection {
    /// Resolve the driver and environment variables into a `ConnectionConfig`
    pub fn resolve(&self, name: &str) -> Result<ConnectionConfig> {
        let driver: Driver = self.driver.parse().map_err(|err: SqlGateError| {
            SqlGateError::config_error(format!("Connection '{name}': {}", detail_of(&err)))
        })?;

        let password = match &self.password_env {
            Some(env_var) => std::env::var(env_var).map_err(|_| {
                SqlGateError::config_error(format!(
                    "Environment variable {env_var} not found for password of connection '{name}'"
                ))
            })?,
            None => self.password.clone().unwrap_or_default(),
        };

        let mut config = ConnectionConfig::new(name, driver, self.host.clone())
            .with_database(self.database.clone())
            .with_credentials(self.username.clone(), password);
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.connect_timeout_secs {
            config.connect_timeout_secs = timeout;
        }
        config.trusted_connection = self.trusted_connection;
        config.connection_string = self.connection_string.clone();
        config.extra = self.extra.clone();

        Ok(config)
    }
}

/// Allowlist entry as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    #[serde(default)]
    pub databases: Vec<String>,

    #[serde(default = "all_schemas")]
    pub schemas: Vec<String>,
}

fn all_schemas() -> Vec<String> {
    vec![WILDCARD.to_string()]
}

/// Validated, ready-to-use configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub connections: Vec<ConnectionConfig>,
    pub allowlist: Allowlist,
}

impl AppConfig {
    /// Parse a configuration document
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| SqlGateError::config_error(format!("Invalid config file format: {e}")))
    }

    /// Overlay `local` on top of `self`; same-named entries are replaced
    #[must_use]
    pub fn merge(mut self, local: Self) -> Self {
        self.connections.extend(local.connections);
        self.allowlist.extend(local.allowlist);
        self
    }

    /// Validate and resolve every connection and allowlist entry
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        if let Some(orphan) = self.allowlist.keys().find(|name| !self.connections.contains_key(*name)) {
            return Err(SqlGateError::config_error(format!(
                "Allowlist entry '{orphan}' does not name a configured connection. Available: {:?}",
                self.connections.keys().collect::<Vec<_>>()
            )));
        }

        let connections = self
            .connections
            .iter()
            .map(|(name, stored)| stored.resolve(name))
            .collect::<Result<Vec<_>>>()?;

        let allowlist = Allowlist::new(self.allowlist.iter().map(|(name, entry)| {
            AllowedTarget::new(name.clone(), entry.databases.clone(), entry.schemas.clone())
        }));

        Ok(ResolvedConfig { connections, allowlist })
    }
}

/// Get path to local config file (`.sqlgate/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        SqlGateError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".sqlgate").join("config.json"))
}

/// Get path to global config file (`~/.config/sqlgate/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| SqlGateError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("sqlgate").join("config.json"))
}

/// Load one config file; it must exist
pub fn load_config_file(path: &Path) -> Result<AppConfig> {
    let contents = fs::read_to_string(path).map_err(|e| {
        SqlGateError::config_error(format!("Could not read config file '{}': {e}", path.display()))
    })?;
    debug!(path = %path.display(), "config file loaded");
    AppConfig::from_json(&contents)
}

/// Merge the global and local files, local winning; at least one must exist
pub fn load_merged(global_path: &Path, local_path: &Path) -> Result<AppConfig> {
    match (global_path.exists(), local_path.exists()) {
        (false, false) => Err(SqlGateError::config_error(format!(
            "No configuration found. Looked for '{}' and '{}'",
            global_path.display(),
            local_path.display()
        ))),
        (true, false) => load_config_file(global_path),
        (false, true) => load_config_file(local_path),
        (true, true) => Ok(load_config_file(global_path)?.merge(load_config_file(local_path)?)),
    }
}

/// Load configuration with precedence (explicit path, else global merged with local)
pub fn load_with_precedence(explicit: Option<&Path>) -> Result<AppConfig> {
    match explicit {
        Some(path) => load_config_file(path),
        None => load_merged(&global_config_path()?, &local_config_path()?),
    }
}

/// Load, validate and resolve configuration in one step
pub fn load(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    load_with_precedence(explicit)?.resolve()
}

fn detail_of(err: &SqlGateError) -> String {
    match err {
        SqlGateError::ConfigError(detail) => detail.clone(),
        other => other.message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "connections": {
            "warehouse": {
                "driver": "sql_server",
                "host": "db.internal",
                "database": "sales",
                "username": "svc",
                "password": "hunter2",
                "trust_server_certificate": true
            },
            "shop": { "driver": "mysql", "host": "localhost", "port": 3307 }
        },
        "allowlist": {
            "warehouse": { "databases": ["sales", "archive"], "schemas": ["dbo"] },
            "shop": { "databases": ["shop"] }
        }
    }"#;

    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sqlgate-config-{}-{test}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_resolve_sample() {
        let resolved = AppConfig::from_json(SAMPLE).unwrap().resolve().unwrap();
        assert_eq!(resolved.connections.len(), 2);

        let shop = &resolved.connections[0];
        assert_eq!(shop.name, "shop");
        assert_eq!(shop.driver, Driver::MySql);
        assert_eq!(shop.port, 3307);
        assert_eq!(shop.database, "");

        let warehouse = &resolved.connections[1];
        assert_eq!(warehouse.port, 1433);
        assert_eq!(warehouse.password, "hunter2");
        assert!(warehouse.extra_flag("trust_server_certificate"));

        assert_eq!(resolved.allowlist.get_allowed_databases("warehouse"), ["sales", "archive"]);
        assert_eq!(resolved.allowlist.get_allowed_schemas("shop"), [WILDCARD]);
    }

    #[test]
    fn test_unknown_driver() {
        let config =
            AppConfig::from_json(r#"{"connections": {"pg": {"driver": "postgres", "host": "x"}}}"#)
                .unwrap();
        let err = config.resolve().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("Connection 'pg': Unknown driver 'postgres'"));
        assert!(err.message().contains("sql_server"));
    }

    #[test]
    fn test_orphan_allowlist_entry() {
        let config = AppConfig::from_json(
            r#"{"connections": {}, "allowlist": {"ghost": {"databases": ["x"]}}}"#,
        )
        .unwrap();
        let err = config.resolve().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("'ghost'"));
    }

    #[test]
    fn test_password_env_resolution() {
        std::env::set_var("SQLGATE_TEST_PASSWORD", "from-env");
        let config = AppConfig::from_json(
            r#"{"connections": {"a": {"driver": "mysql", "host": "h", "password_env": "SQLGATE_TEST_PASSWORD"}}}"#,
        )
        .unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.connections[0].password, "from-env");
        std::env::remove_var("SQLGATE_TEST_PASSWORD");
    }

    #[test]
    fn test_missing_password_env() {
        let config = AppConfig::from_json(
            r#"{"connections": {"a": {"driver": "mysql", "host": "h", "password_env": "SQLGATE_NONEXISTENT_VAR"}}}"#,
        )
        .unwrap();
        let err = config.resolve().unwrap_err();
        assert!(err.message().contains("Environment variable SQLGATE_NONEXISTENT_VAR not found"));
    }

    #[test]
    fn test_stored_connection_debug_redacts_password() {
        let config = AppConfig::from_json(SAMPLE).unwrap();
        let debug = format!("{:?}", config.connections["warehouse"]);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_local_overrides_global() {
        let global = AppConfig::from_json(SAMPLE).unwrap();
        let local = AppConfig::from_json(
            r#"{"connections": {"shop": {"driver": "mysql", "host": "local-host"}},
                "allowlist": {"shop": {"databases": ["dev"]}}}"#,
        )
        .unwrap();

        let merged = global.merge(local);
        assert_eq!(merged.connections.len(), 2);
        assert_eq!(merged.connections["shop"].host, "local-host");
        assert_eq!(merged.connections["warehouse"].host, "db.internal");
        assert_eq!(merged.allowlist["shop"].databases, vec!["dev".to_string()]);
    }

    #[test]
    fn test_load_merged_from_files() {
        let dir = scratch_dir("merged");
        let global = dir.join("global.json");
        let local = dir.join("local.json");
        fs::write(&global, SAMPLE).unwrap();
        fs::write(&local, r#"{"connections": {"extra": {"driver": "mysql", "host": "h"}}}"#).unwrap();

        let merged = load_merged(&global, &local).unwrap();
        assert_eq!(merged.connections.len(), 3);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_no_config_found() {
        let dir = scratch_dir("missing");
        let err = load_merged(&dir.join("a.json"), &dir.join("b.json")).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("No configuration found"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let err = load_with_precedence(Some(Path::new("/nonexistent/sqlgate.json"))).unwrap_err();
        assert!(err.message().contains("Could not read config file"));
    }

    #[test]
    fn test_invalid_json() {
        let err = AppConfig::from_json("{not json").unwrap_err();
        assert!(err.message().contains("Invalid config file format"));
    }
}
