//! Target Allowlist
//!
//! Per-connection policy over which databases and schemas may be targeted.
//! A connection with no policy entry is treated as "nothing permitted".
//! The schema set `["*"]` permits every schema but the database set is still enforced.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SqlGateError};

/// Schema sentinel meaning "all schemas allowed"
pub const WILDCARD: &str = "*";

/// Policy for one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedTarget {
    pub connection_name: String,
    pub databases: Vec<String>,
    pub schemas: Vec<String>,
}

impl AllowedTarget {
    pub fn new(
        connection_name: impl Into<String>,
        databases: Vec<String>,
        schemas: Vec<String>,
    ) -> Self {
        Self { connection_name: connection_name.into(), databases, schemas }
    }

    /// Whether the schema set is the wildcard
    #[must_use]
    pub fn all_schemas(&self) -> bool {
        self.schemas.iter().any(|s| s == WILDCARD)
    }

    fn allows_database(&self, database: &str) -> bool {
        self.databases.iter().any(|d| d == database)
    }

    fn allows_schema(&self, schema: &str) -> bool {
        self.all_schemas() || self.schemas.iter().any(|s| s == schema)
    }
}

/// Immutable policy map keyed by connection name
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    targets: BTreeMap<String, AllowedTarget>,
}

impl Allowlist {
    pub fn new(targets: impl IntoIterator<Item = AllowedTarget>) -> Self {
        Self {
            targets: targets.into_iter().map(|t| (t.connection_name.clone(), t)).collect(),
        }
    }

    fn require_target(&self, connection_name: &str, target: &str) -> Result<&AllowedTarget> {
        self.targets.get(connection_name).ok_or_else(|| {
            debug!(connection = connection_name, target, "no allowlist policy");
            SqlGateError::permission_denied(
                connection_name,
                target,
                "No allowlist configured for this connection.",
            )
        })
    }

    /// Fail unless `database` is in the connection's database set
    pub fn validate_database(&self, connection_name: &str, database: &str) -> Result<()> {
        let policy = self.require_target(connection_name, database)?;
        if !policy.allows_database(database) {
            debug!(connection = connection_name, database, "database outside allowlist");
            return Err(SqlGateError::permission_denied(
                connection_name,
                database,
                format!("Database not in allowlist. Allowed: {:?}", policy.databases),
            ));
        }
        Ok(())
    }

    /// Fail unless the schema set is the wildcard or contains `schema`
    pub fn validate_schema(&self, connection_name: &str, schema: &str) -> Result<()> {
        let policy = self.require_target(connection_name, schema)?;
        if !policy.allows_schema(schema) {
            debug!(connection = connection_name, schema, "schema outside allowlist");
            return Err(SqlGateError::permission_denied(
                connection_name,
                schema,
                format!("Schema not in allowlist. Allowed: {:?}", policy.schemas),
            ));
        }
        Ok(())
    }

    /// Configured database set (empty when no policy)
    #[must_use]
    pub fn get_allowed_databases(&self, connection_name: &str) -> &[String] {
        self.targets.get(connection_name).map_or(&[], |t| t.databases.as_slice())
    }

    /// Configured schema set (empty when no policy)
    #[must_use]
    pub fn get_allowed_schemas(&self, connection_name: &str) -> &[String] {
        self.targets.get(connection_name).map_or(&[], |t| t.schemas.as_slice())
    }

    /// Whether a listed schema should be shown for this connection
    ///
    /// Used to filter listings post-hoc; entries without a schema are kept.
    #[must_use]
    pub fn shows_schema(&self, connection_name: &str, schema: Option<&str>) -> bool {
        match (self.targets.get(connection_name), schema) {
            (_, None) => true,
            (Some(policy), Some(schema)) => policy.allows_schema(schema),
            (None, Some(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn allowlist() -> Allowlist {
        Allowlist::new([
            AllowedTarget::new("warehouse", strings(&["sales", "ops"]), strings(&[WILDCARD])),
            AllowedTarget::new("crm", strings(&["crm"]), strings(&["dbo", "audit"])),
            AllowedTarget::new("empty", vec![], strings(&[WILDCARD])),
        ])
    }

    #[test]
    fn test_absent_connection_denies_everything() {
        let list = allowlist();
        let err = list.validate_database("unknown", "sales").unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
        assert!(err.message().contains("No allowlist configured for this connection."));
        assert!(list.validate_schema("unknown", "dbo").is_err());
        assert!(list.get_allowed_databases("unknown").is_empty());
        assert!(list.get_allowed_schemas("unknown").is_empty());
    }

    #[test]
    fn test_database_set_enforced() {
        let list = allowlist();
        assert!(list.validate_database("warehouse", "sales").is_ok());
        let err = list.validate_database("warehouse", "hr").unwrap_err();
        assert_eq!(
            err.message(),
            "Permission denied on 'warehouse' for target 'hr': \
             Database not in allowlist. Allowed: [\"sales\", \"ops\"]"
        );
    }

    #[test]
    fn test_database_match_is_exact() {
        let list = allowlist();
        assert!(list.validate_database("warehouse", "SALES").is_err());
    }

    #[test]
    fn test_empty_database_set_denies() {
        assert!(allowlist().validate_database("empty", "anything").is_err());
    }

    #[test]
    fn test_wildcard_schema_still_enforces_databases() {
        let list = allowlist();
        assert!(list.validate_schema("warehouse", "any_schema_at_all").is_ok());
        assert!(list.validate_database("warehouse", "hr").is_err());
    }

    #[test]
    fn test_explicit_schema_set() {
        let list = allowlist();
        assert!(list.validate_schema("crm", "audit").is_ok());
        let err = list.validate_schema("crm", "sys").unwrap_err();
        assert!(err.message().contains("Schema not in allowlist"));
    }

    #[test]
    fn test_listing_filter() {
        let list = allowlist();
        assert!(list.shows_schema("crm", Some("dbo")));
        assert!(!list.shows_schema("crm", Some("sys")));
        assert!(list.shows_schema("crm", None));
        assert!(list.shows_schema("warehouse", Some("sys")));
        assert!(!list.shows_schema("unknown", Some("dbo")));
    }
}
