//! SQL parsing utilities: comment stripping, single-statement parsing, statement kinds
//!
//! Uses the sqlparser crate with the PostgreSQL dialect so that the tree the
//! validator inspects matches what the database will actually run.

use lazy_regex::{Lazy, Regex, lazy_regex};
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::panic::{AssertUnwindSafe, catch_unwind};
use thiserror::Error;

static LINE_COMMENT: Lazy<Regex> = lazy_regex!(r"--[^\n]*");
static BLOCK_COMMENT: Lazy<Regex> = lazy_regex!(r"/\*[\s\S]*?\*/");

/// Why a string could not be turned into exactly one statement
///
/// The `Display` text is what a rejected verdict reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// Grammar error reported by the parser
    #[error("SQL parse error: {0}")]
    Syntax(String),

    /// Input parsed to zero statements
    #[error("No valid SQL statement found")]
    Empty,

    /// Input parsed to more than one statement
    #[error("Multiple statements are not permitted")]
    Multiple(usize),

    /// Parser panicked; treated like a syntax error
    #[error("SQL parse error: internal parser failure")]
    Internal,
}

/// Remove `--` line comments and `/* */` block comments, then trim
///
/// Stripping is purely textual: comment markers inside string literals are
/// removed too. That can only break a query, never hide one, because the
/// result is what gets parsed and executed.
///
/// # Examples
/// ```
/// # use cloudintel_nl2sql::sql_parser::strip_comments;
/// let sql = "SELECT * FROM person -- everyone\n/* WHERE status = 'active' */";
/// assert_eq!(strip_comments(sql), "SELECT * FROM person");
///
/// let sql = "/* a */ SELECT 1 /* b */";
/// assert_eq!(strip_comments(sql), "SELECT 1");
/// ```
pub fn strip_comments(sql: &str) -> String {
    let without_lines = LINE_COMMENT.replace_all(sql, "");
    let without_blocks = BLOCK_COMMENT.replace_all(&without_lines, "");
    without_blocks.trim().to_string()
}

/// Parse `sql` with the PostgreSQL grammar, requiring exactly one statement
///
/// Parser panics are caught and reported as [`ParseFailure::Internal`] so a
/// hostile input can never take the process down.
pub fn parse_single_statement(sql: &str) -> Result<Statement, ParseFailure> {
    let parsed = catch_unwind(AssertUnwindSafe(|| {
        Parser::parse_sql(&PostgreSqlDialect {}, sql)
    }))
    .map_err(|_| {
        log::error!("SQL parser panicked on input of {} bytes", sql.len());
        ParseFailure::Internal
    })?;

    let mut statements = parsed.map_err(|e| ParseFailure::Syntax(e.to_string()))?;

    match statements.len() {
        0 => Err(ParseFailure::Empty),
        1 => statements.pop().ok_or(ParseFailure::Empty),
        n => Err(ParseFailure::Multiple(n)),
    }
}

/// Name of the statement's kind, lower-cased (e.g. "select", "insert", "drop")
///
/// A query whose body is itself a data-modifying statement
/// (`WITH ... INSERT ...`) reports the inner kind.
///
/// # Examples
/// ```
/// # use cloudintel_nl2sql::sql_parser::{parse_single_statement, statement_kind};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let stmt = parse_single_statement("SELECT 1")?;
/// assert_eq!(statement_kind(&stmt), "select");
///
/// let stmt = parse_single_statement("DROP TABLE person")?;
/// assert_eq!(statement_kind(&stmt), "drop");
/// # Ok(())
/// # }
/// ```
pub fn statement_kind(stmt: &Statement) -> String {
    let kind = match stmt {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Insert(inner) => return statement_kind(inner),
            SetExpr::Update(inner) => return statement_kind(inner),
            SetExpr::Delete(inner) => return statement_kind(inner),
            SetExpr::Merge(inner) => return statement_kind(inner),
            _ => "select",
        },
        Statement::Insert { .. } => "insert",
        Statement::Update { .. } => "update",
        Statement::Delete { .. } => "delete",
        Statement::Merge { .. } => "merge",
        Statement::CreateTable { .. } => "create_table",
        Statement::CreateView { .. } => "create_view",
        Statement::CreateIndex { .. } => "create_index",
        Statement::AlterTable { .. } => "alter_table",
        Statement::Drop { .. } => "drop",
        Statement::Truncate { .. } => "truncate",
        Statement::Copy { .. } => "copy",
        Statement::Grant { .. } => "grant",
        Statement::Revoke { .. } => "revoke",
        Statement::Explain { .. } => "explain",
        Statement::StartTransaction { .. } => "begin",
        Statement::Commit { .. } => "commit",
        Statement::Rollback { .. } => "rollback",
        other => return first_keyword(&other.to_string()),
    };
    kind.to_string()
}

/// First word of the rendered statement, lower-cased
fn first_keyword(rendered: &str) -> String {
    rendered
        .split_whitespace()
        .next()
        .map(|word| word.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_and_block_comments() {
        let sql = "-- header\nSELECT id /* inline */ FROM person -- trailing";
        assert_eq!(strip_comments(sql), "SELECT id  FROM person");
    }

    #[test]
    fn test_strip_multiple_block_comments_non_greedy() {
        let sql = "SELECT /* a */ id, /* b */ display_name FROM person";
        let cleaned = strip_comments(sql);
        assert!(cleaned.contains("id,"));
        assert!(cleaned.contains("display_name FROM person"));
        assert!(!cleaned.contains("/*"));
    }

    #[test]
    fn test_strip_hidden_statement() {
        let sql = "SELECT 1 /* ; DROP TABLE person */";
        assert_eq!(strip_comments(sql), "SELECT 1");
    }

    #[test]
    fn test_strip_only_comments_is_empty() {
        assert!(strip_comments("-- nothing\n/* here */").is_empty());
    }

    #[test]
    fn test_unicode_comment_stripped() {
        let cleaned = strip_comments("-- コメント\nSELECT 1");
        assert_eq!(cleaned, "SELECT 1");
    }

    #[test]
    fn test_parse_single() {
        let result = parse_single_statement("SELECT id FROM person");
        assert!(result.is_ok(), "parse failed: {:?}", result.err());
    }

    #[test]
    fn test_parse_multiple() {
        let result = parse_single_statement("SELECT 1; SELECT 2");
        assert_eq!(result.err(), Some(ParseFailure::Multiple(2)));
    }

    #[test]
    fn test_parse_syntax_error() {
        let result = parse_single_statement("SELEC id FROM person");
        assert!(matches!(result, Err(ParseFailure::Syntax(_))));
        if let Err(failure) = result {
            assert!(failure.to_string().starts_with("SQL parse error:"));
        }
    }

    #[test]
    fn test_unterminated_string() {
        let result = parse_single_statement("SELECT 'open FROM person");
        assert!(matches!(result, Err(ParseFailure::Syntax(_))));
    }

    #[test]
    fn test_statement_kinds() {
        let cases = [
            ("SELECT 1", "select"),
            ("INSERT INTO person (id) VALUES (1)", "insert"),
            ("UPDATE person SET status = 'x'", "update"),
            ("DELETE FROM person", "delete"),
            ("DROP TABLE person", "drop"),
            ("TRUNCATE person", "truncate"),
            ("CREATE TABLE t (id INT)", "create_table"),
            ("ALTER TABLE person ADD COLUMN x INT", "alter_table"),
        ];
        for (sql, expected) in cases {
            let stmt = parse_single_statement(sql);
            assert!(stmt.is_ok(), "parse failed for {}: {:?}", sql, stmt.err());
            if let Ok(stmt) = stmt {
                assert_eq!(statement_kind(&stmt), expected, "for {}", sql);
            }
        }
    }

    #[test]
    fn test_with_insert_reports_inner_kind() {
        let sql = "WITH x AS (SELECT 1) INSERT INTO person (id) SELECT * FROM x";
        let stmt = parse_single_statement(sql);
        assert!(stmt.is_ok(), "parse failed: {:?}", stmt.err());
        if let Ok(stmt) = stmt {
            assert_eq!(statement_kind(&stmt), "insert");
        }
    }

    #[test]
    fn test_first_keyword_fallback() {
        assert_eq!(first_keyword("VACUUM person"), "vacuum");
        assert_eq!(first_keyword(""), "unknown");
    }
}
