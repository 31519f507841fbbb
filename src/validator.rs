//! Statement validation for model-generated SQL
//!
//! [`StatementValidator::validate`] decides whether a string may reach the
//! database. It never fails: malformed input produces a rejected
//! [`ValidationVerdict`]. Stages run in order:
//!
//! 1. strip comments
//! 2. keyword and multi-statement pre-screen (short-circuits)
//! 3. parse exactly one PostgreSQL statement (short-circuits)
//! 4. require a SELECT root (short-circuits)
//! 5. reject nested writes, `SELECT INTO` and row locks
//! 6. check table references (CTE names excluded) against blocked prefixes
//!    and the allow-list
//! 7. check function calls against the block-list
//! 8. bound the row count of accepted queries
//!
//! Stages 5 to 7 accumulate every violation before returning.

use crate::error::DatabaseError;
use crate::extract::{collect_functions, collect_tables, find_side_effects};
use crate::registry::AllowBlockRegistry;
use crate::sql_limiter::apply_row_limit;
use crate::sql_parser::{parse_single_statement, statement_kind, strip_comments};
use crate::types::ValidationVerdict;
use lazy_regex::{Lazy, Regex, lazy_regex};
use sqlparser::ast::Statement;
use std::collections::BTreeSet;
use std::sync::Arc;

static TRAILING_SEMICOLON: Lazy<Regex> = lazy_regex!(r";\s*$");

/// Policy engine for candidate SQL
///
/// Holds only read-only state, so one instance can be shared across tasks.
#[derive(Debug, Clone)]
pub struct StatementValidator {
    registry: Arc<AllowBlockRegistry>,
    keyword_patterns: Vec<(String, regex::Regex)>,
}

impl StatementValidator {
    /// Build a validator, compiling one whole-word pattern per blocked keyword
    ///
    /// # Errors
    /// Returns [`DatabaseError::Configuration`] if a keyword cannot be
    /// compiled into a pattern.
    pub fn new(registry: Arc<AllowBlockRegistry>) -> Result<Self, DatabaseError> {
        let keyword_patterns = registry
            .blocked_keywords
            .iter()
            .map(|keyword| {
                let words: Vec<String> =
                    keyword.split_whitespace().map(regex::escape).collect();
                let pattern = format!(r"(?i)\b{}\b", words.join(r"\s+"));
                regex::Regex::new(&pattern)
                    .map(|re| (keyword.clone(), re))
                    .map_err(|e| {
                        DatabaseError::Configuration(format!(
                            "Invalid blocked keyword '{}': {}",
                            keyword, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            registry,
            keyword_patterns,
        })
    }

    pub fn registry(&self) -> &AllowBlockRegistry {
        &self.registry
    }

    /// Validate one candidate SQL string
    ///
    /// # Examples
    /// ```
    /// # use cloudintel_nl2sql::registry::AllowBlockRegistry;
    /// # use cloudintel_nl2sql::validator::StatementValidator;
    /// # use std::sync::Arc;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let validator = StatementValidator::new(Arc::new(AllowBlockRegistry::standard()))?;
    ///
    /// let verdict = validator.validate("SELECT * FROM person");
    /// assert!(verdict.is_valid);
    /// assert_eq!(
    ///     verdict.sanitized_sql.as_deref(),
    ///     Some("select * from (SELECT * FROM person) as _bounded limit 500")
    /// );
    ///
    /// let verdict = validator.validate("SELECT pg_sleep(999)");
    /// assert!(!verdict.is_valid);
    /// # Ok(())
    /// # }
    /// ```
    pub fn validate(&self, raw_sql: &str) -> ValidationVerdict {
        let verdict = self.run_pipeline(raw_sql);
        if verdict.is_valid {
            log::debug!(
                "SQL accepted (tables: {:?}, functions: {:?})",
                verdict.tables_referenced,
                verdict.functions_used
            );
        } else {
            log::debug!("SQL rejected: {}", verdict.errors.join("; "));
        }
        verdict
    }

    fn run_pipeline(&self, raw_sql: &str) -> ValidationVerdict {
        let sql = strip_comments(raw_sql);
        if sql.is_empty() {
            return ValidationVerdict::rejected("Empty SQL after stripping comments");
        }

        let screen_errors = self.pre_screen(&sql);
        if !screen_errors.is_empty() {
            return ValidationVerdict::rejected_with(
                screen_errors,
                None,
                BTreeSet::new(),
                BTreeSet::new(),
            );
        }

        let statement = match parse_single_statement(&sql) {
            Ok(statement) => statement,
            Err(failure) => return ValidationVerdict::rejected(failure.to_string()),
        };

        let kind = statement_kind(&statement);
        let tables = collect_tables(&statement);
        let functions = collect_functions(&statement);

        let query = match &statement {
            Statement::Query(query) if kind == "select" => query,
            _ => {
                return ValidationVerdict::rejected_with(
                    vec![format!("Only SELECT statements are permitted (got {})", kind)],
                    Some(kind),
                    tables,
                    functions,
                );
            }
        };

        let mut errors = find_side_effects(&statement).violations();

        errors.extend(self.table_violations(&tables));
        errors.extend(self.function_violations(&functions));

        if !errors.is_empty() {
            return ValidationVerdict::rejected_with(errors, Some(kind), tables, functions);
        }

        let sanitized = apply_row_limit(&sql, query, self.registry.max_rows);
        ValidationVerdict::accepted(sanitized, kind, tables, functions)
    }

    /// Textual checks run before parsing
    fn pre_screen(&self, sql: &str) -> Vec<String> {
        let mut errors: Vec<String> = self
            .keyword_patterns
            .iter()
            .filter(|(_, pattern)| pattern.is_match(sql))
            .map(|(keyword, _)| format!("Blocked keyword detected: {}", keyword))
            .collect();

        if TRAILING_SEMICOLON.replace(sql, "").contains(';') {
            errors.push("Multiple statements are not permitted".to_string());
        }
        errors
    }

    fn table_violations(&self, tables: &BTreeSet<String>) -> Vec<String> {
        let mut errors = Vec::new();
        for table in tables {
            if let Some(prefix) = self.registry.blocked_prefix_for(table) {
                errors.push(format!(
                    "Access to system table '{}' is not permitted (blocked prefix '{}')",
                    table, prefix
                ));
            }
            if !self.registry.is_table_allowed(table) {
                errors.push(format!("Table '{}' is not in the allowed list", table));
            }
        }
        errors
    }

    /// A schema-qualified call is blocked if its last segment is blocked
    fn function_violations(&self, functions: &BTreeSet<String>) -> Vec<String> {
        functions
            .iter()
            .filter(|function| {
                let base = function.rsplit('.').next().unwrap_or(function.as_str());
                self.registry.is_function_blocked(function)
                    || self.registry.is_function_blocked(base)
            })
            .map(|function| format!("Function '{}' is not permitted", function))
            .collect()
    }
}
