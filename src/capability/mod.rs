//! Statement Gating per Operation Path
//!
//! Each operation path carries its own permitted statement kinds rather than sharing one
//! global allow-set:
//! - `execute_query`: SELECT only
//! - `execute_statement`: INSERT, UPDATE, CREATE, ALTER, MERGE, SELECT; DELETE, DROP and
//!   TRUNCATE are always blocked here
//! - `delete_statement`: DELETE only, and the text must contain a `WHERE` keyword
//! - `drop_statement`: DROP only
//!
//! Multi-statement payloads are rejected on every path before any kind-based gate runs.
//! Units are counted with the target backend's lexing rules. MySQL executable comments
//! (`/*! ... */`) run as SQL on the server, so they are rejected outright there.
//!
//! The `WHERE` guard is a literal keyword search over the raw text. A `WHERE` inside a
//! string literal or comment satisfies it.

pub mod classifier;

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

pub use classifier::{classify, count_statements, count_statements_for, StatementType};

use crate::engine::Driver;
use crate::error::{Result, SqlGateError};

/// Violation kind reported for multi-statement payloads
pub const MULTI: &str = "MULTI";

/// Kinds never accepted by `execute_statement`
pub const BLOCKED_FOR_STATEMENT: [StatementType; 3] =
    [StatementType::Delete, StatementType::Drop, StatementType::Truncate];

/// Kinds accepted by `execute_statement`
pub const ALLOWED_FOR_STATEMENT: [StatementType; 6] = [
    StatementType::Insert,
    StatementType::Update,
    StatementType::Create,
    StatementType::Alter,
    StatementType::Merge,
    StatementType::Select,
];

/// Opens a MySQL comment whose body the server executes
const EXECUTABLE_COMMENT: &str = "/*!";

static WHERE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("WHERE pattern is valid"));

/// Operation path a piece of caller SQL is submitted through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementPath {
    Query,
    Statement,
    Delete,
    Drop,
}

impl StatementPath {
    /// Name of the exposed operation for this path
    #[must_use]
    pub const fn operation(self) -> &'static str {
        match self {
            Self::Query => "execute_query",
            Self::Statement => "execute_statement",
            Self::Delete => "delete_statement",
            Self::Drop => "drop_statement",
        }
    }

    /// Run the multi-statement check for the target backend, then this path's gate
    pub fn check(self, sql: &str, driver: Option<Driver>) -> Result<StatementType> {
        reject_multi_statement_for(sql, driver)?;
        match self {
            Self::Query => gate_for_query(sql),
            Self::Statement => gate_for_statement(sql),
            Self::Delete => gate_for_delete(sql),
            Self::Drop => gate_for_drop(sql),
        }
    }
}

/// Deny text holding more than one non-empty statement under any backend's reading
pub fn reject_multi_statement(sql: &str) -> Result<()> {
    reject_multi_statement_for(sql, None)
}

/// Deny text `driver` would run as more than one statement
///
/// `None` applies every backend's rules.
pub fn reject_multi_statement_for(sql: &str, driver: Option<Driver>) -> Result<()> {
    if driver != Some(Driver::SqlServer) && sql.contains(EXECUTABLE_COMMENT) {
        debug!("rejected MySQL executable comment");
        return Err(SqlGateError::validation_failed(
            MULTI,
            "MySQL executable comments (/*! ... */) are not allowed. Submit plain SQL.",
        ));
    }

    let units = count_statements_for(sql, driver);
    if units > 1 {
        debug!(units, "rejected multi-statement payload");
        return Err(SqlGateError::validation_failed(
            MULTI,
            "Multiple statements detected. Submit one statement at a time.",
        ));
    }
    Ok(())
}

/// Permit SELECT only
pub fn gate_for_query(sql: &str) -> Result<StatementType> {
    let kind = classify(sql);
    if kind != StatementType::Select {
        return Err(deny(
            kind,
            format!("execute_query only allows SELECT statements. Got: {kind}"),
        ));
    }
    Ok(kind)
}

/// Permit the general write/DDL set; DELETE, DROP and TRUNCATE are always blocked
pub fn gate_for_statement(sql: &str) -> Result<StatementType> {
    let kind = classify(sql);
    if BLOCKED_FOR_STATEMENT.contains(&kind) {
        return Err(deny(
            kind,
            format!(
                "Destructive statement '{kind}' is blocked in execute_statement. \
                 Use the dedicated delete_statement or drop_statement tools."
            ),
        ));
    }
    if !ALLOWED_FOR_STATEMENT.contains(&kind) {
        return Err(deny(kind, format!("Statement type '{kind}' is not allowed in execute_statement.")));
    }
    Ok(kind)
}

/// Permit DELETE only, and only when the text contains `WHERE`
pub fn gate_for_delete(sql: &str) -> Result<StatementType> {
    let kind = classify(sql);
    if kind != StatementType::Delete {
        return Err(deny(kind, format!("delete_statement only allows DELETE. Got: {kind}")));
    }
    if !WHERE_KEYWORD.is_match(sql) {
        return Err(deny(kind, "DELETE without WHERE clause is not allowed. Add a WHERE clause."));
    }
    Ok(kind)
}

/// Permit DROP only
pub fn gate_for_drop(sql: &str) -> Result<StatementType> {
    let kind = classify(sql);
    if kind != StatementType::Drop {
        return Err(deny(kind, format!("drop_statement only allows DROP. Got: {kind}")));
    }
    Ok(kind)
}

fn deny(kind: StatementType, detail: impl Into<String>) -> SqlGateError {
    let detail = detail.into();
    debug!(statement_type = %kind, %detail, "statement denied by gate");
    SqlGateError::validation_failed(kind.as_str(), detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied_kind(result: Result<StatementType>) -> String {
        match result {
            Err(SqlGateError::ValidationFailed { statement_type, .. }) => statement_type,
            other => panic!("expected a validation failure, got {other:?}"),
        }
    }

    // Multi-statement tests

    #[test]
    fn test_multi_statement_rejected() {
        let err = reject_multi_statement("SELECT 1; SELECT 2").unwrap_err();
        assert!(matches!(
            &err,
            SqlGateError::ValidationFailed { statement_type, .. } if statement_type == MULTI
        ));
        assert!(err.message().contains("Submit one statement at a time"));
    }

    #[test]
    fn test_trailing_semicolon_allowed() {
        assert!(reject_multi_statement("SELECT 1;").is_ok());
        assert!(reject_multi_statement("SELECT 1;   \n").is_ok());
    }

    #[test]
    fn test_multi_check_runs_before_gate() {
        // Both statements are SELECT; the multi check still wins
        let kind = denied_kind(StatementPath::Query.check("SELECT 1; SELECT 2", None));
        assert_eq!(kind, MULTI);
    }

    #[test]
    fn test_mysql_hash_comment_cannot_hide_second_statement() {
        let sql = "SELECT 1 # '\n; DROP TABLE users; -- '";
        for driver in [Some(Driver::MySql), None] {
            assert_eq!(denied_kind(StatementPath::Query.check(sql, driver)), MULTI);
        }
    }

    #[test]
    fn test_mysql_executable_comment_rejected() {
        let sql = "SELECT 1 /*!; DROP TABLE users */";
        for driver in [Some(Driver::MySql), None] {
            let err = StatementPath::Query.check(sql, driver).unwrap_err();
            assert!(err.message().contains("executable comments"));
            assert_eq!(denied_kind(Err(err)), MULTI);
        }
        assert!(reject_multi_statement("SELECT /*!40001 SQL_NO_CACHE */ 1").is_err());
    }

    #[test]
    fn test_plain_block_comment_still_allowed() {
        assert_eq!(
            StatementPath::Query.check("SELECT /* note; here */ 1", Some(Driver::MySql)).unwrap(),
            StatementType::Select
        );
        // T-SQL has no executable comments
        assert_eq!(
            StatementPath::Query.check("SELECT 1 /*! not special */", Some(Driver::SqlServer)).unwrap(),
            StatementType::Select
        );
    }

    // Query path

    #[test]
    fn test_query_allows_select() {
        assert_eq!(gate_for_query("select * from users").unwrap(), StatementType::Select);
    }

    #[test]
    fn test_query_denies_everything_else() {
        for sql in [
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET a = 1",
            "DELETE FROM t WHERE id = 1",
            "DROP TABLE t",
            "EXPLAIN SELECT 1",
            "",
        ] {
            assert!(gate_for_query(sql).is_err(), "{sql} should be denied");
        }
        let err = gate_for_query("DROP TABLE t").unwrap_err();
        assert!(err.message().contains("Got: DROP"));
        assert_eq!(denied_kind(gate_for_query("SHOW TABLES")), "UNKNOWN");
    }

    // Statement path

    #[test]
    fn test_statement_allows_general_set() {
        assert_eq!(gate_for_statement("INSERT INTO t VALUES (1)").unwrap(), StatementType::Insert);
        assert_eq!(gate_for_statement("UPDATE t SET a = 1").unwrap(), StatementType::Update);
        assert_eq!(gate_for_statement("CREATE TABLE t (id INT)").unwrap(), StatementType::Create);
        assert_eq!(gate_for_statement("ALTER TABLE t ADD b INT").unwrap(), StatementType::Alter);
        assert_eq!(gate_for_statement("SELECT 1").unwrap(), StatementType::Select);
    }

    #[test]
    fn test_statement_blocks_destructive() {
        for (sql, kind) in [
            ("DELETE FROM t WHERE id = 1", "DELETE"),
            ("DROP TABLE t", "DROP"),
            ("TRUNCATE TABLE t", "TRUNCATE"),
        ] {
            let err = gate_for_statement(sql).unwrap_err();
            assert!(err.message().contains("Use the dedicated delete_statement or drop_statement"));
            assert_eq!(denied_kind(Err(err)), kind);
        }
    }

    #[test]
    fn test_statement_denies_unknown() {
        let err = gate_for_statement("GRANT SELECT ON t TO bob").unwrap_err();
        assert!(err.message().contains("Statement type 'UNKNOWN' is not allowed"));
    }

    // Delete path

    #[test]
    fn test_delete_requires_where() {
        let err = gate_for_delete("DELETE FROM t").unwrap_err();
        assert!(err.message().contains("DELETE without WHERE clause is not allowed"));
        assert_eq!(gate_for_delete("DELETE FROM t WHERE id=1").unwrap(), StatementType::Delete);
        assert!(gate_for_delete("delete from t where id = 1").is_ok());
    }

    #[test]
    fn test_delete_where_is_literal_search() {
        // Known limitation: WHERE inside a literal satisfies the guard
        assert!(gate_for_delete("DELETE FROM t -- WHERE nothing").is_ok());
        // Word boundary: a column called NOWHERE does not count
        assert!(gate_for_delete("DELETE FROM nowhere_log").is_err());
    }

    #[test]
    fn test_delete_denies_other_kinds() {
        let err = gate_for_delete("UPDATE t SET a = 1 WHERE id = 1").unwrap_err();
        assert!(err.message().contains("delete_statement only allows DELETE. Got: UPDATE"));
    }

    // Drop path

    #[test]
    fn test_drop_path() {
        assert_eq!(gate_for_drop("DROP TABLE t").unwrap(), StatementType::Drop);
        let err = gate_for_drop("TRUNCATE TABLE t").unwrap_err();
        assert!(err.message().contains("drop_statement only allows DROP. Got: TRUNCATE"));
    }

    #[test]
    fn test_path_operation_names() {
        assert_eq!(StatementPath::Query.operation(), "execute_query");
        assert_eq!(StatementPath::Drop.operation(), "drop_statement");
    }
}
