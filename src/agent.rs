//! Question-to-answer orchestration
//!
//! [`QueryAgent::ask`] builds the prompt, asks the model, interprets its
//! reply, validates the generated SQL, runs the sanitized statement for the
//! caller's tenant and shapes the answer. Only SQL that passed
//! [`StatementValidator::validate`] ever reaches the executor.

use crate::audit::{AuditSink, record_detached};
use crate::error::AgentError;
use crate::executor::TenantExecute;
use crate::llm::{CompletionRequest, LanguageModel};
use crate::prompt::build_system_prompt;
use crate::registry::MAX_QUESTION_LENGTH;
use crate::schema::SchemaCache;
use crate::types::{
    AuditEntry, AuditStatus, ChatResponse, ClarificationRequest, Complexity, ModelAnswer,
    QueryMetadata, QueryPlan,
};
use crate::validator::StatementValidator;
use chrono::Utc;
use lazy_regex::{Lazy, Regex, lazy_regex};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

static OPENING_FENCE: Lazy<Regex> = lazy_regex!(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?");
static CLOSING_FENCE: Lazy<Regex> = lazy_regex!(r"\r?\n?```\s*$");

/// Completion budget used unless overridden
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Columns whose distinct values are summarized as a provider breakdown
const PROVIDER_COLUMNS: [&str; 3] = ["provider_type", "provider", "cloud_provider"];

/// Interpreted model reply
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// The model needs the user to narrow the question
    Clarification {
        query_plan: Option<QueryPlan>,
        message: Option<String>,
        options: Vec<String>,
        follow_up_suggestions: Vec<String>,
    },

    /// The model produced a query to run
    Query {
        query_plan: QueryPlan,
        sql: String,
        explanation: String,
        follow_up_suggestions: Vec<String>,
    },
}

/// Remove a surrounding ``` fence (with optional language tag) from a model reply
///
/// ```
/// # use cloudintel_nl2sql::agent::strip_code_fence;
/// assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
/// assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
/// ```
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let start = OPENING_FENCE.find(trimmed).map(|m| m.end()).unwrap_or(0);
    let body = &trimmed[start..];
    let end = CLOSING_FENCE.find(body).map(|m| m.start()).unwrap_or(body.len());
    body[..end].trim()
}

/// Parse a model reply into a [`ModelReply`], refusing anything incomplete
pub fn parse_model_reply(text: &str) -> Result<ModelReply, AgentError> {
    let answer: ModelAnswer = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| AgentError::MalformedModelResponse(e.to_string()))?;

    let follow_up_suggestions = answer.follow_up_suggestions.unwrap_or_default();

    if answer.needs_clarification.unwrap_or(false) {
        return Ok(ModelReply::Clarification {
            query_plan: answer.query_plan,
            message: answer.clarification_message.filter(|m| !m.trim().is_empty()),
            options: answer.clarification_options.unwrap_or_default(),
            follow_up_suggestions,
        });
    }

    let sql = answer
        .sql
        .filter(|sql| !sql.trim().is_empty())
        .ok_or_else(|| AgentError::MalformedModelResponse("missing required field 'sql'".to_string()))?;
    let query_plan = answer
        .query_plan
        .ok_or_else(|| AgentError::MalformedModelResponse("missing required field 'queryPlan'".to_string()))?;
    let explanation = answer
        .explanation
        .ok_or_else(|| AgentError::MalformedModelResponse("missing required field 'explanation'".to_string()))?;

    Ok(ModelReply::Query {
        query_plan,
        sql,
        explanation,
        follow_up_suggestions,
    })
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// Short human-readable summary of a result set
///
/// Adds a provider breakdown when the rows carry a provider column, and a
/// member/collaborator split when they carry `is_outside_collaborator`.
pub fn generate_narrative(rows: &[Map<String, Value>], row_count: usize, explanation: &str) -> String {
    if row_count == 0 {
        return "No results found matching your query. \
                This could mean the access does not exist, or the search terms need adjusting."
            .to_string();
    }

    let mut parts = vec![format!("Found {}.", plural(row_count, "result"))];

    if !explanation.trim().is_empty() {
        parts.push(explanation.trim().to_string());
    }

    if let Some(first) = rows.first() {
        if let Some(column) = PROVIDER_COLUMNS.iter().find(|c| first.contains_key(**c)) {
            let mut providers: Vec<String> = Vec::new();
            for value in rows.iter().filter_map(|row| row.get(*column)) {
                let name = match value {
                    Value::Null => continue,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !providers.contains(&name) {
                    providers.push(name);
                }
            }
            if !providers.is_empty() {
                parts.push(format!(
                    "Across {}: {}.",
                    plural(providers.len(), "provider"),
                    providers.join(", ")
                ));
            }
        }

        if first.contains_key("is_outside_collaborator") {
            let flag = |wanted: bool| {
                rows.iter()
                    .filter(|row| row.get("is_outside_collaborator") == Some(&Value::Bool(wanted)))
                    .count()
            };
            let external = flag(true);
            let members = flag(false);
            if external > 0 || members > 0 {
                parts.push(format!(
                    "{} and {}.",
                    plural(members, "member"),
                    plural(external, "external collaborator")
                ));
            }
        }
    }

    parts.join(" ")
}

/// Successful outcome plus what the audit trail needs about it
struct Answered {
    response: ChatResponse,
    executed_sql: String,
    duration_ms: u64,
}

/// Orchestrates model, validator and executor for one question at a time
pub struct QueryAgent {
    validator: Arc<StatementValidator>,
    executor: Arc<dyn TenantExecute>,
    model: Arc<dyn LanguageModel>,
    schema: Arc<SchemaCache>,
    audit: Arc<dyn AuditSink>,
    max_tokens: u32,
}

impl QueryAgent {
    pub fn new(
        validator: Arc<StatementValidator>,
        executor: Arc<dyn TenantExecute>,
        model: Arc<dyn LanguageModel>,
        schema: Arc<SchemaCache>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            validator,
            executor,
            model,
            schema,
            audit,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema
    }

    /// Answer `question` for `tenant_id`, recording an audit entry either way
    ///
    /// On failure, show the user [`AgentError::public_message`], not the error itself.
    pub async fn ask(&self, question: &str, tenant_id: &str, user_id: &str) -> Result<ChatResponse, AgentError> {
        let started = Instant::now();
        let outcome = self.answer(question, tenant_id).await;

        let mut entry = AuditEntry {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            question: question.to_string(),
            sql_executed: String::new(),
            row_count: 0,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            status: AuditStatus::Success,
            rejection_reason: None,
            recorded_at: Utc::now(),
        };

        match &outcome {
            Ok(answered) => {
                entry.sql_executed = answered.executed_sql.clone();
                entry.row_count = answered.response.metadata.row_count;
                entry.duration_ms = answered.duration_ms;
            }
            Err(e @ (AgentError::ValidationRejected(_) | AgentError::InvalidQuestion(_))) => {
                log::info!("Question rejected for tenant {}: {}", tenant_id, e);
                entry.status = AuditStatus::Rejected;
                entry.rejection_reason = Some(e.public_message());
            }
            Err(e) => {
                log::error!("Question failed for tenant {}: {}", tenant_id, e);
                entry.status = AuditStatus::Error;
            }
        }

        record_detached(Arc::clone(&self.audit), entry);

        outcome.map(|answered| answered.response)
    }

    async fn answer(&self, question: &str, tenant_id: &str) -> Result<Answered, AgentError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AgentError::InvalidQuestion("Question cannot be empty".to_string()));
        }
        if question.chars().count() > MAX_QUESTION_LENGTH {
            return Err(AgentError::InvalidQuestion(format!(
                "Question exceeds maximum length of {} characters",
                MAX_QUESTION_LENGTH
            )));
        }

        let schema_context = self.schema.get_or_load().await?;
        let registry = self.validator.registry();

        let completion = self
            .model
            .complete(&CompletionRequest {
                system_prompt: build_system_prompt(&schema_context, registry),
                user_message: question.to_string(),
                max_tokens: self.max_tokens,
            })
            .await?;
        log::debug!(
            "{} model {} answered (usage: {:?})",
            self.model.provider(),
            completion.model,
            completion.usage
        );

        let response_id = Uuid::new_v4().to_string();

        let (query_plan, sql, explanation, follow_up_suggestions) = match parse_model_reply(&completion.text)? {
            ModelReply::Clarification {
                query_plan,
                message,
                options,
                follow_up_suggestions,
            } => {
                let response = ChatResponse {
                    id: response_id,
                    query_plan: query_plan.unwrap_or_else(|| QueryPlan {
                        description: "Clarification needed".to_string(),
                        tables_used: Vec::new(),
                        estimated_complexity: Complexity::Low,
                    }),
                    sql: String::new(),
                    results: Vec::new(),
                    narrative: message
                        .clone()
                        .unwrap_or_else(|| "Could you please clarify your question?".to_string()),
                    explanation: String::new(),
                    metadata: QueryMetadata {
                        tables_used: Vec::new(),
                        row_count: 0,
                        execution_time_ms: 0,
                        cached: false,
                    },
                    follow_up_suggestions,
                    clarification_needed: Some(ClarificationRequest {
                        message: message.unwrap_or_else(|| "Please clarify".to_string()),
                        options,
                    }),
                };
                return Ok(Answered {
                    response,
                    executed_sql: String::new(),
                    duration_ms: 0,
                });
            }
            ModelReply::Query {
                query_plan,
                sql,
                explanation,
                follow_up_suggestions,
            } => (query_plan, sql, explanation, follow_up_suggestions),
        };

        let verdict = self.validator.validate(&sql);
        let sanitized_sql = match verdict.sanitized_sql {
            Some(sanitized) if verdict.is_valid => sanitized,
            _ => return Err(AgentError::ValidationRejected(verdict.errors)),
        };

        let result = self
            .executor
            .execute_as_tenant(tenant_id, &sanitized_sql, &[], registry.statement_timeout_ms)
            .await?;

        let narrative = generate_narrative(&result.rows, result.row_count, &explanation);

        Ok(Answered {
            response: ChatResponse {
                id: response_id,
                query_plan,
                sql,
                narrative,
                explanation,
                metadata: QueryMetadata {
                    tables_used: verdict.tables_referenced.into_iter().collect(),
                    row_count: result.row_count,
                    execution_time_ms: result.duration_ms,
                    cached: false,
                },
                results: result.rows,
                follow_up_suggestions,
                clarification_needed: None,
            },
            executed_sql: sanitized_sql,
            duration_ms: result.duration_ms,
        })
    }
}
