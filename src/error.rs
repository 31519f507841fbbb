//! Error types for validation, execution and orchestration

use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed
    #[error("Query error: {0}")]
    QueryError(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Tenant identifier outside the expected character class
    #[error("Invalid tenant identifier: {0}")]
    InvalidTenant(String),

    /// Static configuration could not be turned into a usable policy
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// sqlx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Whether the server cancelled the statement or the pool ran dry
    pub fn is_timeout(&self) -> bool {
        match self {
            DatabaseError::Timeout(_) => true,
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut) => true,
            // 57014 = query_canceled, raised when statement_timeout fires
            DatabaseError::Sqlx(sqlx::Error::Database(db_err)) => {
                db_err.code().as_deref() == Some("57014")
            }
            _ => false,
        }
    }
}

/// Language-model provider errors
#[derive(Error, Debug)]
pub enum ModelError {
    /// Transport-level failure (DNS, TLS, connection reset)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("Provider {provider} returned status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// Provider answered but carried no text content
    #[error("No text response received from {0}")]
    EmptyResponse(&'static str),

    /// Unknown provider name in configuration
    #[error("Unsupported LLM provider '{0}'. Supported values: anthropic, openai, gemini")]
    UnsupportedProvider(String),

    /// No API key configured for the selected provider
    #[error("Missing API key for provider {0}")]
    MissingApiKey(&'static str),
}

/// Errors surfaced by the query orchestrator
///
/// Only [`AgentError::InvalidQuestion`] and [`AgentError::ValidationRejected`]
/// are safe to show verbatim; see [`AgentError::public_message`].
#[derive(Error, Debug)]
pub enum AgentError {
    /// The question itself is unusable (empty, too long)
    #[error("{0}")]
    InvalidQuestion(String),

    /// Generated SQL failed one or more policy checks
    #[error("Generated SQL failed validation: {}", .0.join("; "))]
    ValidationRejected(Vec<String>),

    /// Model call failed
    #[error("Model failure: {0}")]
    ModelFailure(#[from] ModelError),

    /// Model answered with content that does not match the response contract
    #[error("Failed to parse agent response: {0}")]
    MalformedModelResponse(String),

    /// Connection, timeout or execution error after validation passed
    #[error("Database failure: {0}")]
    DatabaseFailure(#[from] DatabaseError),
}

/// Generic message returned to callers for non-validation failures
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to process your question. Please try rephrasing.";

impl AgentError {
    /// Message that may be returned to the end user
    ///
    /// Validation messages describe the query, not infrastructure, and pass
    /// through unchanged. Everything else is replaced with an opaque message.
    ///
    /// ```
    /// use cloudintel_nl2sql::error::{AgentError, GENERIC_FAILURE_MESSAGE};
    ///
    /// let rejected = AgentError::ValidationRejected(vec!["Function 'pg_sleep' is not permitted".into()]);
    /// assert!(rejected.public_message().contains("pg_sleep"));
    ///
    /// let failed = AgentError::MalformedModelResponse("expected value at line 1".into());
    /// assert_eq!(failed.public_message(), GENERIC_FAILURE_MESSAGE);
    /// ```
    pub fn public_message(&self) -> String {
        match self {
            AgentError::InvalidQuestion(_) | AgentError::ValidationRejected(_) => self.to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Whether this failure counts as a policy rejection rather than an error
    pub fn is_rejection(&self) -> bool {
        matches!(self, AgentError::ValidationRejected(_))
    }
}

/// Audit sink failures; logged and discarded by callers
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Audit write failed: {0}")]
    Write(String),
}
