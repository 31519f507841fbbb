//! Database connection pool setup, warmup and health checks

use crate::config::DatabaseConfig;
use crate::dsn::parse_dsn;
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};

/// Application name reported to the server (visible in pg_stat_activity)
pub const APPLICATION_NAME: &str = "cloudintel-nl2sql";

/// Warm up connection pool by pre-establishing min_connections
///
/// Concurrently acquires min_connections to force pool establishment so a
/// bad DSN or unreachable server is reported at startup, not on the first
/// question.
///
/// # Errors
/// Returns error if all warmup connections fail
pub async fn warmup_pool(pool: &PgPool, min_connections: u32) -> Result<()> {
    if min_connections == 0 {
        return Ok(());
    }

    let start = Instant::now();

    let mut handles = Vec::new();
    for i in 0..min_connections {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            sqlx::query("SELECT 1")
                .fetch_one(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Warmup connection {} failed: {}", i + 1, e))
        }));
    }

    let mut ready = 0;
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(_)) => ready += 1,
            Ok(Err(e)) => log::warn!("Connection {} warmup failed: {}", i + 1, e),
            Err(e) => log::warn!("Connection {} warmup task panicked: {}", i + 1, e),
        }
    }

    let elapsed = start.elapsed();

    if ready == 0 {
        anyhow::bail!(
            "Pool warmup failed: 0/{} connections established",
            min_connections
        );
    }

    log::info!(
        "✓ Connection pool warmed up: {}/{} connections ready ({:?})",
        ready,
        min_connections,
        elapsed
    );
    if elapsed > Duration::from_secs(2) {
        log::warn!(
            "Pool warmup was slow ({:?}), queries may see high latency",
            elapsed
        );
    }

    Ok(())
}

/// Build the bounded pool described by `config` and warm it up
///
/// Acquisition fails after `acquire_timeout` instead of queueing, so a
/// saturated pool surfaces as an error rather than a hung request.
pub async fn setup_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let target = parse_dsn(config.dsn.expose_secret()).context("Invalid database DSN")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(Some(config.idle_timeout))
        .max_lifetime(Some(config.max_lifetime))
        .test_before_acquire(true)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SELECT set_config('application_name', $1, false)")
                    .bind(APPLICATION_NAME)
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(config.dsn.expose_secret())
        .await
        .with_context(|| format!("Failed to connect to database {}", target))?;

    warmup_pool(&pool, config.min_connections).await?;

    log::info!("✓ Database connected ({})", target);

    Ok(pool)
}

/// Whether the database answers `SELECT 1`
pub async fn health_check(pool: &PgPool) -> bool {
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => true,
        Err(e) => {
            log::warn!("Database health check failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_warmup_zero_is_noop() {
        let pool = PgPoolOptions::new().connect_lazy("postgres://nobody@127.0.0.1:1/none");
        assert!(pool.is_ok());
        if let Ok(pool) = pool {
            assert!(warmup_pool(&pool, 0).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none");
        assert!(pool.is_ok());
        if let Ok(pool) = pool {
            assert!(!health_check(&pool).await);
        }
    }
}
