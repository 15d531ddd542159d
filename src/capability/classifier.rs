//! Statement Classification
//!
//! Determines the primary statement kind of raw SQL text. A structural parse is tried
//! first (generic, then SQL Server and MySQL dialects); when no dialect yields a statement
//! kind in the known vocabulary, the leading keyword is matched against it instead.
//!
//! Classification is pure: identical text always yields the identical kind.

use std::fmt;

use serde::Serialize;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::{Dialect, GenericDialect, MsSqlDialect, MySqlDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::engine::Driver;

/// Primary kind of a SQL statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Truncate,
    Merge,
    Unknown,
}

impl StatementType {
    /// Known vocabulary ordered longest keyword first, used by the keyword fallback
    const VOCABULARY: [Self; 9] = [
        Self::Truncate,
        Self::Select,
        Self::Insert,
        Self::Update,
        Self::Delete,
        Self::Create,
        Self::Merge,
        Self::Alter,
        Self::Drop,
    ];

    /// Uppercase keyword for this kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Truncate => "TRUNCATE",
            Self::Merge => "MERGE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether this kind produces a result set rather than an affected-row count
    #[must_use]
    pub const fn returns_rows(self) -> bool {
        matches!(self, Self::Select)
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify SQL text into its primary statement kind
#[must_use]
pub fn classify(sql: &str) -> StatementType {
    let dialects: [&dyn Dialect; 3] = [&GenericDialect {}, &MsSqlDialect {}, &MySqlDialect {}];

    for dialect in dialects {
        let Ok(statements) = Parser::parse_sql(dialect, sql) else {
            continue;
        };
        match statements.first().map(statement_kind) {
            Some(StatementType::Unknown) | None => break,
            Some(kind) => return kind,
        }
    }

    classify_by_keyword(sql)
}

fn statement_kind(statement: &Statement) -> StatementType {
    match statement {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(_)
            | SetExpr::Query(_)
            | SetExpr::SetOperation { .. }
            | SetExpr::Values(_)
            | SetExpr::Table(_) => StatementType::Select,
            SetExpr::Insert(_) => StatementType::Insert,
            SetExpr::Update(_) => StatementType::Update,
            _ => StatementType::Unknown,
        },
        Statement::Insert { .. } => StatementType::Insert,
        Statement::Update { .. } => StatementType::Update,
        Statement::Delete { .. } => StatementType::Delete,
        Statement::Merge { .. } => StatementType::Merge,
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. } => StatementType::Create,
        Statement::AlterTable { .. } | Statement::AlterView { .. } | Statement::AlterIndex { .. } => {
            StatementType::Alter
        }
        Statement::Drop { .. } => StatementType::Drop,
        Statement::Truncate { .. } => StatementType::Truncate,
        _ => StatementType::Unknown,
    }
}

/// Case-insensitive longest-match-first scan of the leading keyword
fn classify_by_keyword(sql: &str) -> StatementType {
    let upper = strip_comments(sql).trim().to_uppercase();

    StatementType::VOCABULARY
        .into_iter()
        .find(|kind| upper.starts_with(kind.as_str()))
        .unwrap_or(StatementType::Unknown)
}

/// Count the non-empty statement units in SQL text
///
/// The backend is not known here, so every supported reading is tried and the largest
/// count wins. See [`count_statements_for`].
#[must_use]
pub fn count_statements(sql: &str) -> usize {
    count_statements_for(sql, None)
}

/// Count the non-empty statement units the way `driver` splits them
///
/// Units are separated by `;` tokens outside string literals, quoted identifiers and
/// comments, as lexed by the backend's dialect. Units holding only whitespace or comments
/// are not counted. MySQL text is also read without backslash escapes, since
/// `NO_BACKSLASH_ESCAPES` is a session setting; the larger count wins. With no driver
/// every dialect is tried.
#[must_use]
pub fn count_statements_for(sql: &str, driver: Option<Driver>) -> usize {
    match driver {
        Some(Driver::MySql) => count_units(&MySqlDialect {}, sql).max(count_units(&GenericDialect {}, sql)),
        Some(Driver::SqlServer) => count_units(&MsSqlDialect {}, sql),
        None => count_units(&MySqlDialect {}, sql)
            .max(count_units(&MsSqlDialect {}, sql))
            .max(count_units(&GenericDialect {}, sql)),
    }
}

/// Count units over one dialect's token stream
///
/// Text the tokenizer rejects (unterminated literals) is split on every raw `;` instead.
fn count_units(dialect: &dyn Dialect, sql: &str) -> usize {
    let Ok(tokens) = Tokenizer::new(dialect, sql).tokenize() else {
        return strip_comments(sql).split(';').filter(|unit| !unit.trim().is_empty()).count();
    };

    let mut count = 0;
    let mut unit_has_content = false;
    for token in &tokens {
        match token {
            Token::SemiColon => {
                if unit_has_content {
                    count += 1;
                }
                unit_has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => unit_has_content = true,
        }
    }
    if unit_has_content {
        count += 1;
    }

    count
}

/// Strip SQL comments from query
///
/// Handles:
/// - Line comments: -- comment
/// - Block comments: /* comment */
pub(crate) fn strip_comments(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for ch in chars.by_ref() {
                    if prev == '*' && ch == '/' {
                        break;
                    }
                    prev = ch;
                }
                result.push(' ');
            }
            _ => result.push(ch),
        }
    }

    result
}
