//! Classification, Gate and Allowlist Properties
//!
//! Pure checks through the public API; no adapter is involved.

use sqlgate::capability::{
    gate_for_delete, gate_for_drop, gate_for_query, gate_for_statement, reject_multi_statement,
    MULTI,
};
use sqlgate::{classify, count_statements, AllowedTarget, Allowlist, SqlGateError, StatementType};

fn denial(result: sqlgate::Result<impl std::fmt::Debug>) -> (String, String) {
    match result {
        Err(SqlGateError::ValidationFailed { statement_type, detail }) => (statement_type, detail),
        other => panic!("expected a validation failure, got {other:?}"),
    }
}

// ============================================================================
// Classifier
// ============================================================================

#[test]
fn test_classification_ignores_case_and_whitespace() {
    for sql in ["  select 1", "SELECT 1", "Select 1", "\n\tSELECT 1"] {
        assert_eq!(classify(sql), StatementType::Select, "{sql:?}");
    }
}

#[test]
fn test_every_known_kind() {
    let cases = [
        ("INSERT INTO t (a) VALUES (1)", StatementType::Insert),
        ("UPDATE t SET a = 1", StatementType::Update),
        ("DELETE FROM t WHERE a = 1", StatementType::Delete),
        ("CREATE TABLE t (a INT)", StatementType::Create),
        ("ALTER TABLE t ADD COLUMN b INT", StatementType::Alter),
        ("DROP TABLE t", StatementType::Drop),
        ("TRUNCATE TABLE t", StatementType::Truncate),
        ("WITH x AS (SELECT 1) SELECT * FROM x", StatementType::Select),
    ];
    for (sql, expected) in cases {
        assert_eq!(classify(sql), expected, "{sql}");
    }
}

#[test]
fn test_leading_comment_and_vendor_syntax() {
    assert_eq!(classify("-- fetch\nSELECT 1"), StatementType::Select);
    assert_eq!(classify("/* note */ DROP TABLE t"), StatementType::Drop);
    assert_eq!(
        classify("MERGE INTO target USING source ON target.id = source.id WHEN MATCHED THEN DELETE"),
        StatementType::Merge
    );
    assert_eq!(classify("SELECT TOP 5 * FROM [dbo].[users] WITH (NOLOCK)"), StatementType::Select);
}

#[test]
fn test_unknown_statements() {
    assert_eq!(classify(""), StatementType::Unknown);
    assert_eq!(classify("EXEC sp_who"), StatementType::Unknown);
    assert_eq!(classify("GRANT SELECT ON t TO bob"), StatementType::Unknown);
}

#[test]
fn test_statement_counting() {
    assert_eq!(count_statements("SELECT 1"), 1);
    assert_eq!(count_statements("SELECT 1;  \n"), 1);
    assert_eq!(count_statements("SELECT 1; SELECT 2"), 2);
    assert_eq!(count_statements("SELECT 'a;b'"), 1);
    assert_eq!(count_statements("SELECT 1 -- trailing; comment"), 1);
}

// ============================================================================
// Gates
// ============================================================================

#[test]
fn test_multi_statement_rejection() {
    let (kind, _) = denial(reject_multi_statement("SELECT 1; SELECT 2"));
    assert_eq!(kind, MULTI);
    assert!(reject_multi_statement("SELECT 1;").is_ok());
}

#[test]
fn test_query_gate_denies_everything_but_select() {
    assert_eq!(gate_for_query("SELECT 1").unwrap(), StatementType::Select);
    for sql in ["UPDATE t SET a = 1", "EXEC sp_who", "DROP TABLE t"] {
        let (kind, detail) = denial(gate_for_query(sql));
        assert!(detail.contains(&format!("Got: {kind}")), "{detail}");
    }
    let (kind, _) = denial(gate_for_query("EXEC sp_who"));
    assert_eq!(kind, "UNKNOWN");
}

#[test]
fn test_statement_gate() {
    for sql in ["DELETE FROM t WHERE a = 1", "DROP TABLE t", "TRUNCATE TABLE t"] {
        let (_, detail) = denial(gate_for_statement(sql));
        assert!(detail.contains("delete_statement or drop_statement"), "{detail}");
    }
    for sql in ["INSERT INTO t VALUES (1)", "UPDATE t SET a = 1", "CREATE TABLE t (a INT)", "SELECT 1"] {
        assert!(gate_for_statement(sql).is_ok(), "{sql}");
    }
    let (kind, _) = denial(gate_for_statement("EXEC sp_who"));
    assert_eq!(kind, "UNKNOWN");
}

#[test]
fn test_delete_gate_where_guard() {
    let (kind, detail) = denial(gate_for_delete("DELETE FROM t"));
    assert_eq!(kind, "DELETE");
    assert!(detail.contains("WHERE"));

    assert!(gate_for_delete("DELETE FROM t WHERE id=1").is_ok());
    // literal text search: a WHERE inside a comment still satisfies the guard
    assert!(gate_for_delete("DELETE FROM t -- where").is_ok());
    // ...but not as part of another identifier
    assert!(gate_for_delete("DELETE FROM somewhere").is_err());
}

#[test]
fn test_drop_gate() {
    assert_eq!(gate_for_drop("DROP VIEW v").unwrap(), StatementType::Drop);
    let (kind, _) = denial(gate_for_drop("DELETE FROM t WHERE 1=1"));
    assert_eq!(kind, "DELETE");
}

// ============================================================================
// Allowlist
// ============================================================================

fn policy() -> Allowlist {
    Allowlist::new([
        AllowedTarget::new("open", vec!["app".into()], vec!["*".into()]),
        AllowedTarget::new("narrow", vec!["app".into()], vec!["dbo".into()]),
    ])
}

#[test]
fn test_absent_connection_denies_everything() {
    let allowlist = policy();
    for result in [
        allowlist.validate_database("missing", "app"),
        allowlist.validate_schema("missing", "dbo"),
    ] {
        assert_eq!(result.unwrap_err().error_code(), "PERMISSION_DENIED");
    }
    assert!(allowlist.get_allowed_databases("missing").is_empty());
    assert!(allowlist.get_allowed_schemas("missing").is_empty());
}

#[test]
fn test_wildcard_schema_still_enforces_databases() {
    let allowlist = policy();
    assert!(allowlist.validate_schema("open", "anything_at_all").is_ok());
    assert!(allowlist.validate_database("open", "app").is_ok());
    assert!(allowlist.validate_database("open", "other").is_err());
}

#[test]
fn test_explicit_schema_set() {
    let allowlist = policy();
    assert!(allowlist.validate_schema("narrow", "dbo").is_ok());
    let err = allowlist.validate_schema("narrow", "sales").unwrap_err();
    assert!(err.message().contains("Schema not in allowlist"));
}
