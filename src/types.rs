//! Type definitions for validation, execution and query responses

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of validating one candidate SQL string
///
/// Construct through [`ValidationVerdict::accepted`] or
/// [`ValidationVerdict::rejected`]; both keep `is_valid`, `errors` and
/// `sanitized_sql` consistent with each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationVerdict {
    /// True only when no policy violation was found
    pub is_valid: bool,

    /// Every violation found, in pipeline order
    pub errors: Vec<String>,

    /// Comment-free, row-bounded SQL ready for execution (valid verdicts only)
    pub sanitized_sql: Option<String>,

    /// Parsed statement discriminant (e.g. "select"), when parsing succeeded
    pub statement_kind: Option<String>,

    /// Lower-cased table names, schema-qualified where written
    pub tables_referenced: BTreeSet<String>,

    /// Lower-cased function names, dotted when schema-qualified
    pub functions_used: BTreeSet<String>,
}

impl ValidationVerdict {
    /// Verdict for a statement that passed every check
    pub fn accepted(
        sanitized_sql: String,
        statement_kind: String,
        tables_referenced: BTreeSet<String>,
        functions_used: BTreeSet<String>,
    ) -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            sanitized_sql: Some(sanitized_sql),
            statement_kind: Some(statement_kind),
            tables_referenced,
            functions_used,
        }
    }

    /// Verdict carrying a single error and nothing else
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![error.into()],
            sanitized_sql: None,
            statement_kind: None,
            tables_referenced: BTreeSet::new(),
            functions_used: BTreeSet::new(),
        }
    }

    /// Rejection with the diagnostics gathered before the failing stage
    ///
    /// An empty error list is replaced with a generic message so that a
    /// rejected verdict never reports zero errors.
    pub fn rejected_with(
        errors: Vec<String>,
        statement_kind: Option<String>,
        tables_referenced: BTreeSet<String>,
        functions_used: BTreeSet<String>,
    ) -> Self {
        let errors = if errors.is_empty() {
            vec!["SQL validation failed".to_string()]
        } else {
            errors
        };
        Self {
            is_valid: false,
            errors,
            sanitized_sql: None,
            statement_kind,
            tables_referenced,
            functions_used,
        }
    }
}

/// Positional parameter bound to a tenant-scoped query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Rows returned by one tenant-scoped execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantExecutionResult {
    /// One JSON object per row, keyed by column name
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,

    /// Number of rows returned
    pub row_count: usize,

    /// Wall-clock time spent inside the transaction
    pub duration_ms: u64,
}

/// Model's estimate of how expensive the query is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Model-authored description of the query it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// Plain-language summary of what the query does
    pub description: String,

    /// Tables the model says it used
    #[serde(default)]
    pub tables_used: Vec<String>,

    pub estimated_complexity: Complexity,
}

/// Clarification prompt returned instead of running a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClarificationRequest {
    pub message: String,
    pub options: Vec<String>,
}

/// JSON object the model is told to reply with
///
/// Every field is optional at the wire level. Which ones are actually
/// required depends on `needsClarification`, and that check happens when
/// the answer is interpreted, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelAnswer {
    /// Required unless asking for clarification
    pub query_plan: Option<QueryPlan>,

    /// A single PostgreSQL SELECT statement; required unless asking for clarification
    pub sql: Option<String>,

    /// How the results should be interpreted; required unless asking for clarification
    pub explanation: Option<String>,

    pub follow_up_suggestions: Option<Vec<String>>,

    /// Set when the question is too ambiguous to answer with a query
    pub needs_clarification: Option<bool>,

    pub clarification_message: Option<String>,

    pub clarification_options: Option<Vec<String>>,
}

/// Execution metadata attached to an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryMetadata {
    /// Tables the validator observed in the executed SQL
    pub tables_used: Vec<String>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub cached: bool,
}

/// Answer to one natural-language question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Unique response identifier (UUID v4)
    pub id: String,

    pub query_plan: QueryPlan,

    /// SQL as produced by the model, before sanitization
    pub sql: String,

    pub results: Vec<serde_json::Map<String, serde_json::Value>>,

    /// Human-readable summary of the results
    pub narrative: String,

    pub explanation: String,

    pub metadata: QueryMetadata,

    pub follow_up_suggestions: Vec<String>,

    /// Present only when the model asked for clarification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_needed: Option<ClarificationRequest>,
}

/// Outcome recorded for an audited question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Error,
    Rejected,
}

/// One audit record per attempted question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant_id: String,
    pub user_id: String,
    pub question: String,

    /// Executed SQL; empty when rejected before execution
    pub sql_executed: String,
    pub row_count: usize,
    pub duration_ms: u64,
    pub status: AuditStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_invariants() {
        let verdict = ValidationVerdict::accepted(
            "SELECT 1 LIMIT 1".to_string(),
            "select".to_string(),
            BTreeSet::new(),
            BTreeSet::new(),
        );
        assert!(verdict.is_valid);
        assert!(verdict.errors.is_empty());
        assert!(verdict.sanitized_sql.is_some());
    }

    #[test]
    fn test_rejected_never_empty() {
        let verdict =
            ValidationVerdict::rejected_with(vec![], None, BTreeSet::new(), BTreeSet::new());
        assert!(!verdict.is_valid);
        assert_eq!(verdict.errors.len(), 1);
        assert!(verdict.sanitized_sql.is_none());
    }

    #[test]
    fn test_query_plan_camel_case() {
        let json = r#"{"description":"d","tablesUsed":["person"],"estimatedComplexity":"medium"}"#;
        let plan: Result<QueryPlan, _> = serde_json::from_str(json);
        assert!(plan.is_ok(), "deserialize failed: {:?}", plan.err());
        if let Ok(plan) = plan {
            assert_eq!(plan.tables_used, vec!["person".to_string()]);
            assert_eq!(plan.estimated_complexity, Complexity::Medium);
        }
    }

    #[test]
    fn test_sql_param_untagged() {
        let params: Vec<SqlParam> = vec![SqlParam::Text("a".into()), SqlParam::Int(3)];
        let json = serde_json::to_string(&params).unwrap_or_default();
        assert_eq!(json, r#"["a",3]"#);
    }

    #[test]
    fn test_model_answer_nulls_and_missing_fields() {
        let json = r#"{"sql":"SELECT 1","clarificationMessage":null,"clarificationOptions":null}"#;
        let answer: Result<ModelAnswer, _> = serde_json::from_str(json);
        assert!(answer.is_ok(), "deserialize failed: {:?}", answer.err());
        if let Ok(answer) = answer {
            assert_eq!(answer.sql.as_deref(), Some("SELECT 1"));
            assert!(answer.query_plan.is_none());
            assert!(answer.needs_clarification.is_none());
        }
    }
}
