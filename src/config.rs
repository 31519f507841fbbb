//! Environment-driven configuration
//!
//! Everything is read once at startup into plain structs. Secrets stay
//! wrapped in [`SecretString`] so they cannot end up in a `Debug` dump.

use crate::dsn::parse_dsn;
use crate::error::ModelError;
use crate::registry::{DEFAULT_MAX_ROWS, DEFAULT_STATEMENT_TIMEOUT_MS};
use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub dsn: SecretString,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// Which hosted model answers questions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
}

impl ProviderKind {
    /// Provider-specific variable consulted when `LLM_API_KEY` is unset
    pub fn api_key_var(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GOOGLE_API_KEY",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(ModelError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model provider settings
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: ProviderKind,

    /// Overrides the provider's default model
    pub model: Option<String>,

    /// `None` is only an error once a model is actually built
    pub api_key: Option<SecretString>,

    pub max_tokens: u32,
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Absent when `DATABASE_DSN` is unset; only `validate` works then
    pub database: Option<DatabaseConfig>,
    pub max_rows: usize,
    pub statement_timeout_ms: u64,
    pub model: ModelConfig,
}

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database = match get("DATABASE_DSN") {
            Some(dsn) => {
                let info = parse_dsn(&dsn).context("Invalid DATABASE_DSN")?;
                log::debug!("Database target: {}", info);

                let max_connections = parse_or(&get, "DB_MAX_CONNECTIONS", 10u32)?;
                let min_connections = parse_or(&get, "DB_MIN_CONNECTIONS", 2u32)?;
                if max_connections == 0 {
                    bail!("DB_MAX_CONNECTIONS must be at least 1");
                }
                if min_connections > max_connections {
                    bail!(
                        "DB_MIN_CONNECTIONS ({}) cannot exceed DB_MAX_CONNECTIONS ({})",
                        min_connections,
                        max_connections
                    );
                }

                Some(DatabaseConfig {
                    dsn: SecretString::from(dsn),
                    max_connections,
                    min_connections,
                    acquire_timeout: Duration::from_secs(parse_or(&get, "DB_ACQUIRE_TIMEOUT_SECS", 5u64)?),
                    idle_timeout: Duration::from_secs(parse_or(&get, "DB_IDLE_TIMEOUT_SECS", 30u64)?),
                    max_lifetime: Duration::from_secs(parse_or(&get, "DB_MAX_LIFETIME_SECS", 1800u64)?),
                })
            }
            None => None,
        };

        let max_rows = parse_or(&get, "QUERY_MAX_ROWS", DEFAULT_MAX_ROWS)?;
        if max_rows == 0 {
            bail!("QUERY_MAX_ROWS must be at least 1");
        }
        let statement_timeout_ms = parse_or(&get, "QUERY_TIMEOUT_MS", DEFAULT_STATEMENT_TIMEOUT_MS)?;
        if statement_timeout_ms == 0 {
            bail!("QUERY_TIMEOUT_MS must be at least 1");
        }

        let provider = match get("LLM_PROVIDER") {
            Some(name) => name.parse::<ProviderKind>().context("Invalid LLM_PROVIDER")?,
            None => ProviderKind::Anthropic,
        };
        let api_key = get("LLM_API_KEY")
            .or_else(|| get(provider.api_key_var()))
            .map(SecretString::from);

        Ok(AppConfig {
            database,
            max_rows,
            statement_timeout_ms,
            model: ModelConfig {
                provider,
                model: get("LLM_MODEL"),
                api_key,
                max_tokens: parse_or(&get, "LLM_MAX_TOKENS", 4096u32)?,
            },
        })
    }

    /// Database settings, or an error naming the missing variable
    pub fn require_database(&self) -> Result<&DatabaseConfig> {
        self.database
            .as_ref()
            .context("DATABASE_DSN is not set; it is required for this command")
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let result = config_from(&[]);
        assert!(result.is_ok(), "{:?}", result.err());
        if let Ok(config) = result {
            assert!(config.database.is_none());
            assert_eq!(config.max_rows, 500);
            assert_eq!(config.statement_timeout_ms, 10_000);
            assert_eq!(config.model.provider, ProviderKind::Anthropic);
            assert_eq!(config.model.max_tokens, 4096);
            assert!(config.model.api_key.is_none());
            assert!(config.require_database().is_err());
        }
    }

    #[test]
    fn test_database_settings() {
        let result = config_from(&[
            ("DATABASE_DSN", "postgres://app:pw@localhost:5432/cloudintel"),
            ("DB_MAX_CONNECTIONS", "20"),
            ("DB_ACQUIRE_TIMEOUT_SECS", "3"),
        ]);
        assert!(result.is_ok(), "{:?}", result.err());
        if let Ok(config) = result {
            let db = config.require_database();
            assert!(db.is_ok());
            if let Ok(db) = db {
                assert_eq!(db.max_connections, 20);
                assert_eq!(db.min_connections, 2);
                assert_eq!(db.acquire_timeout, Duration::from_secs(3));
                assert_eq!(db.idle_timeout, Duration::from_secs(30));
                assert!(db.dsn.expose_secret().contains("app:pw"));
                assert!(!format!("{:?}", db).contains("app:pw"));
            }
        }
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let result = config_from(&[("QUERY_MAX_ROWS", "lots")]);
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(format!("{:#}", e).contains("QUERY_MAX_ROWS"));
        }
        assert!(config_from(&[("QUERY_TIMEOUT_MS", "0")]).is_err());
    }

    #[test]
    fn test_rejects_min_above_max() {
        let result = config_from(&[
            ("DATABASE_DSN", "postgres://localhost/cloudintel"),
            ("DB_MAX_CONNECTIONS", "2"),
            ("DB_MIN_CONNECTIONS", "5"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_postgres_dsn() {
        assert!(config_from(&[("DATABASE_DSN", "mysql://localhost/db")]).is_err());
    }

    #[test]
    fn test_provider_key_fallback() {
        let result = config_from(&[("LLM_PROVIDER", "OpenAI"), ("OPENAI_API_KEY", "sk-test")]);
        assert!(result.is_ok());
        if let Ok(config) = result {
            assert_eq!(config.model.provider, ProviderKind::OpenAi);
            assert_eq!(
                config.model.api_key.as_ref().map(|k| k.expose_secret().to_string()),
                Some("sk-test".to_string())
            );
        }
    }

    #[test]
    fn test_explicit_key_wins() {
        let result = config_from(&[("ANTHROPIC_API_KEY", "fallback"), ("LLM_API_KEY", "explicit")]);
        assert!(result.is_ok());
        if let Ok(config) = result {
            assert_eq!(
                config.model.api_key.as_ref().map(|k| k.expose_secret().to_string()),
                Some("explicit".to_string())
            );
        }
    }

    #[test]
    fn test_unknown_provider() {
        let result = config_from(&[("LLM_PROVIDER", "mystery")]);
        assert!(result.is_err());
        assert!(matches!(
            "mystery".parse::<ProviderKind>(),
            Err(ModelError::UnsupportedProvider(_))
        ));
    }
}
