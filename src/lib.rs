//! Natural-language questions over cross-cloud identity data
//!
//! Model-generated SQL is parsed, checked against an allow/block registry and
//! row-bounded by [`validator::StatementValidator`] before
//! [`executor::TenantExecutor`] runs it inside a tenant-scoped transaction.

pub mod error;
pub mod types;

// Validation
pub mod extract;
pub mod registry;
pub mod sql_limiter;
pub mod sql_parser;
pub mod validator;

// Execution
pub mod connection;
pub mod dsn;
pub mod executor;
pub mod tenant;

// Orchestration
pub mod agent;
pub mod audit;
pub mod config;
pub mod llm;
pub mod prompt;
pub mod schema;

// Re-export secrecy types for consumers
pub use secrecy::{ExposeSecret, SecretString};

// Re-exports
pub use agent::{QueryAgent, generate_narrative, parse_model_reply, strip_code_fence};
pub use audit::{AuditSink, LogAuditSink, record_detached};
pub use config::{AppConfig, DatabaseConfig, ModelConfig, ProviderKind};
pub use connection::{health_check, setup_pool, warmup_pool};
pub use dsn::{DsnInfo, parse_dsn};
pub use error::{AgentError, AuditError, DatabaseError, GENERIC_FAILURE_MESSAGE, ModelError};
pub use executor::{TenantExecute, TenantExecutor};
pub use llm::{CompletionRequest, CompletionResponse, LanguageModel, TokenUsage};
pub use registry::AllowBlockRegistry;
pub use schema::{PgSchemaSource, SchemaCache, SchemaMetadata, SchemaSource, render_schema_context};
pub use sql_limiter::apply_row_limit;
pub use sql_parser::{parse_single_statement, statement_kind, strip_comments};
pub use tenant::sanitize_tenant_id;
pub use types::{
    AuditEntry, AuditStatus, ChatResponse, ClarificationRequest, Complexity, ModelAnswer,
    QueryMetadata, QueryPlan, SqlParam, TenantExecutionResult, ValidationVerdict,
};
pub use validator::StatementValidator;

use std::sync::Arc;

/// Registry built from the configured row and timeout limits
pub fn registry_from_config(config: &AppConfig) -> Arc<AllowBlockRegistry> {
    Arc::new(AllowBlockRegistry::standard_with_limits(
        config.max_rows,
        config.statement_timeout_ms,
    ))
}

/// Wire up a ready-to-use [`QueryAgent`] from configuration
///
/// Connects and warms the pool, selects the model provider and installs the
/// log-backed audit sink. The schema context is loaded lazily on the first
/// question.
///
/// # Errors
/// Returns error if the DSN is missing or unreachable, or the model provider
/// cannot be configured
pub async fn build_agent(config: &AppConfig) -> anyhow::Result<QueryAgent> {
    use anyhow::Context;

    let database = config.require_database()?;
    let pool = setup_pool(database).await?;

    let validator = StatementValidator::new(registry_from_config(config))
        .context("Failed to build SQL validator")?;
    let model = llm::from_config(&config.model).context("Failed to configure model provider")?;
    let schema = SchemaCache::new(Arc::new(PgSchemaSource::new(pool.clone())));

    Ok(QueryAgent::new(
        Arc::new(validator),
        Arc::new(TenantExecutor::new(pool)),
        model,
        Arc::new(schema),
        Arc::new(LogAuditSink),
    )
    .with_max_tokens(config.model.max_tokens))
}
