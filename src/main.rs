// Command-line front end for the NL2SQL pipeline.
//
// `validate` needs no database. `ask`, `schema` and `health` require DATABASE_DSN;
// `ask` also needs an API key for the configured LLM_PROVIDER.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloudintel_nl2sql::{
    AppConfig, PgSchemaSource, SchemaSource, StatementValidator, build_agent, health_check,
    registry_from_config, render_schema_context, setup_pool,
};
use std::process::ExitCode;
use std::time::Duration;

// Time given to detached audit writes before the runtime shuts down
const AUDIT_FLUSH_GRACE: Duration = Duration::from_millis(100);

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Ask questions about cloud identities in plain English", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a SQL statement against the allow/block policy
    Validate {
        /// SQL to validate
        sql: String,
    },

    /// Answer a natural-language question for one tenant
    Ask {
        /// Tenant UUID the query is scoped to
        #[arg(long)]
        tenant: String,

        /// Caller identity recorded in the audit trail
        #[arg(long)]
        user: String,

        /// The question
        question: String,
    },

    /// Print the schema context given to the model
    Schema,

    /// Check that the database answers queries
    Health,
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_validate(config: &AppConfig, sql: &str) -> Result<ExitCode> {
    let validator = StatementValidator::new(registry_from_config(config))
        .context("Failed to build SQL validator")?;
    let verdict = validator.validate(sql);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(if verdict.is_valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run_ask(config: &AppConfig, tenant: &str, user: &str, question: &str) -> Result<ExitCode> {
    let agent = build_agent(config).await?;
    let outcome = agent.ask(question, tenant, user).await;
    tokio::time::sleep(AUDIT_FLUSH_GRACE).await;

    match outcome {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.public_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_schema(config: &AppConfig) -> Result<ExitCode> {
    let pool = setup_pool(config.require_database()?).await?;
    let meta = PgSchemaSource::new(pool)
        .load()
        .await
        .context("Failed to load schema metadata")?;
    println!("{}", render_schema_context(&meta));
    Ok(ExitCode::SUCCESS)
}

async fn run_health(config: &AppConfig) -> Result<ExitCode> {
    let pool = setup_pool(config.require_database()?).await?;
    if health_check(&pool).await {
        println!("ok");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("unhealthy");
        Ok(ExitCode::FAILURE)
    }
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to read configuration")?;

    match cli.command {
        Commands::Validate { sql } => run_validate(&config, &sql),
        Commands::Ask { tenant, user, question } => run_ask(&config, &tenant, &user, &question).await,
        Commands::Schema => run_schema(&config).await,
        Commands::Health => run_health(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_subcommands() {
        let health = Cli::try_parse_from(["cloudintel-nl2sql", "health"]);
        assert!(matches!(health.map(|c| c.command), Ok(Commands::Health)));

        let ask = Cli::try_parse_from([
            "cloudintel-nl2sql",
            "ask",
            "--tenant",
            "0f8fad5b-d9cb-469f-a165-70867728950e",
            "--user",
            "analyst@example.com",
            "who has admin?",
        ]);
        assert!(matches!(
            ask.map(|c| c.command),
            Ok(Commands::Ask { ref question, .. }) if question == "who has admin?"
        ));
    }
}
