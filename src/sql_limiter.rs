//! Row limiting for accepted queries
//!
//! A query without its own LIMIT is wrapped as a derived table rather than
//! having `LIMIT n` appended, so trailing ORDER BY clauses and set operations
//! keep their meaning.

use lazy_regex::{Lazy, Regex, lazy_regex};
use sqlparser::ast::{Expr, LimitClause, Query, Value};

static TRAILING_SEMICOLON: Lazy<Regex> = lazy_regex!(r";\s*$");

/// Alias given to the wrapped query
pub const BOUNDED_ALIAS: &str = "_bounded";

/// Whether the top-level query already bounds its row count
///
/// `LIMIT n`, `LIMIT off, n` and `FETCH FIRST n ROWS` count when `n` is a
/// numeric literal. `LIMIT ALL`, `LIMIT NULL`, a bare `OFFSET` and any
/// computed count do not, so those queries get wrapped.
pub fn has_row_limit(query: &Query) -> bool {
    if let Some(fetch) = &query.fetch {
        if !fetch.percent && fetch.quantity.as_ref().is_none_or(is_literal_count) {
            return true;
        }
    }
    match &query.limit_clause {
        Some(LimitClause::LimitOffset { limit: Some(limit), .. }) => is_literal_count(limit),
        Some(LimitClause::OffsetCommaLimit { limit, .. }) => is_literal_count(limit),
        _ => false,
    }
}

fn is_literal_count(expr: &Expr) -> bool {
    match expr {
        Expr::Value(literal) => matches!(literal.value, Value::Number(..)),
        Expr::Nested(inner) => is_literal_count(inner),
        _ => false,
    }
}

/// Remove a single trailing semicolon (and whitespace around it)
pub fn strip_trailing_semicolon(sql: &str) -> &str {
    match TRAILING_SEMICOLON.find(sql) {
        Some(found) => sql[..found.start()].trim_end(),
        None => sql.trim_end(),
    }
}

/// Wrap `sql` so that at most `max_rows` rows come back
///
/// # Examples
/// ```
/// # use cloudintel_nl2sql::sql_limiter::bound_rows;
/// assert_eq!(
///     bound_rows("SELECT * FROM person", 500),
///     "select * from (SELECT * FROM person) as _bounded limit 500"
/// );
/// ```
pub fn bound_rows(sql: &str, max_rows: usize) -> String {
    format!(
        "select * from ({}) as {} limit {}",
        strip_trailing_semicolon(sql),
        BOUNDED_ALIAS,
        max_rows
    )
}

/// Final SQL for an accepted query: semicolon removed, bounded when unlimited
pub fn apply_row_limit(sql: &str, query: &Query, max_rows: usize) -> String {
    if has_row_limit(query) {
        strip_trailing_semicolon(sql).to_string()
    } else {
        bound_rows(sql, max_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_parser::parse_single_statement;
    use sqlparser::ast::Statement;

    fn query(sql: &str) -> Box<Query> {
        match parse_single_statement(sql) {
            Ok(Statement::Query(query)) => query,
            other => panic!("expected a query for {}, got {:?}", sql, other),
        }
    }

    #[test]
    fn test_detects_limit() {
        assert!(has_row_limit(&query("SELECT * FROM person LIMIT 10")));
        assert!(has_row_limit(&query("SELECT * FROM person LIMIT 10 OFFSET 5")));
        assert!(has_row_limit(&query(
            "SELECT * FROM person FETCH FIRST 3 ROWS ONLY"
        )));
    }

    #[test]
    fn test_missing_limit() {
        assert!(!has_row_limit(&query("SELECT * FROM person")));
        assert!(!has_row_limit(&query("SELECT * FROM person OFFSET 5")));
        assert!(!has_row_limit(&query("SELECT * FROM person ORDER BY created_at DESC")));
    }

    #[test]
    fn test_null_and_computed_limits_are_unbounded() {
        assert!(!has_row_limit(&query("SELECT * FROM person LIMIT ALL")));
        assert!(!has_row_limit(&query("SELECT * FROM person LIMIT NULL")));
        assert!(!has_row_limit(&query("SELECT * FROM person LIMIT (NULL)")));
        assert!(!has_row_limit(&query("SELECT * FROM person LIMIT NULL OFFSET 5")));
        assert!(!has_row_limit(&query(
            "SELECT * FROM person LIMIT (SELECT NULL::int)"
        )));
        assert!(!has_row_limit(&query(
            "SELECT * FROM person FETCH FIRST NULL ROWS ONLY"
        )));
        assert!(has_row_limit(&query("SELECT * FROM person LIMIT (10)")));

        let sql = "SELECT * FROM person LIMIT NULL";
        assert_eq!(
            apply_row_limit(sql, &query(sql), 500),
            "select * from (SELECT * FROM person LIMIT NULL) as _bounded limit 500"
        );
    }

    #[test]
    fn test_inner_limit_does_not_count() {
        let q = query("SELECT * FROM (SELECT * FROM person LIMIT 5) p");
        assert!(!has_row_limit(&q));
    }

    #[test]
    fn test_wraps_order_by() {
        let sql = "SELECT id FROM person ORDER BY created_at DESC";
        let bounded = apply_row_limit(sql, &query(sql), 100);
        assert_eq!(
            bounded,
            "select * from (SELECT id FROM person ORDER BY created_at DESC) as _bounded limit 100"
        );
        assert!(parse_single_statement(&bounded).is_ok());
    }

    #[test]
    fn test_wraps_union() {
        let sql = "SELECT id FROM person UNION SELECT id FROM github_user";
        let bounded = apply_row_limit(sql, &query(sql), 10);
        assert!(bounded.ends_with("as _bounded limit 10"));
        assert!(parse_single_statement(&bounded).is_ok());
    }

    #[test]
    fn test_keeps_existing_limit() {
        let sql = "SELECT id FROM person LIMIT 10";
        assert_eq!(apply_row_limit(sql, &query(sql), 500), sql);
    }

    #[test]
    fn test_strips_semicolon() {
        assert_eq!(strip_trailing_semicolon("SELECT 1;  "), "SELECT 1");
        assert_eq!(strip_trailing_semicolon("SELECT 1 ; "), "SELECT 1");
        assert_eq!(strip_trailing_semicolon("SELECT 1"), "SELECT 1");
        assert_eq!(
            bound_rows("SELECT * FROM person;", 5),
            "select * from (SELECT * FROM person) as _bounded limit 5"
        );
    }
}
