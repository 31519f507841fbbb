//! Tenant-scoped execution of validated SQL
//!
//! Every call runs in its own transaction. The statement timeout and the
//! tenant id that row-level-security policies read are set with
//! `set_config(..., true)`, which scopes them to that transaction, so a
//! pooled connection never carries one tenant's context into the next call.

pub mod row_converter;
pub mod timeout;

use crate::error::DatabaseError;
use crate::tenant::sanitize_tenant_id;
use crate::types::{SqlParam, TenantExecutionResult};
use async_trait::async_trait;
use row_converter::row_to_json;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPool, Postgres};
use sqlx::query::Query;
use sqlx::Transaction;
use std::time::Instant;
use timeout::{deadline_for, execute_with_deadline};

/// Session setting that row-level-security policies read the tenant from
pub const TENANT_SETTING: &str = "app.current_tenant_id";

/// Runs already-validated SQL on behalf of one tenant
#[async_trait]
pub trait TenantExecute: Send + Sync {
    async fn execute_as_tenant(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[SqlParam],
        timeout_ms: u64,
    ) -> Result<TenantExecutionResult, DatabaseError>;
}

/// PostgreSQL-backed [`TenantExecute`]
#[derive(Clone)]
pub struct TenantExecutor {
    pool: PgPool,
}

impl TenantExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run_in_transaction(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[SqlParam],
        timeout_ms: u64,
    ) -> Result<Vec<Map<String, Value>>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        match run_scoped(&mut tx, tenant_id, sql, params, timeout_ms).await {
            Ok(rows) => {
                tx.commit().await.map_err(|e| {
                    DatabaseError::QueryError(format!("Transaction commit failed: {}", e))
                })?;
                Ok(rows)
            }
            Err(e) => {
                // The original error is what the caller needs; a failed rollback only gets logged
                if let Err(rollback_err) = tx.rollback().await {
                    log::warn!("Rollback after failed tenant query also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TenantExecute for TenantExecutor {
    async fn execute_as_tenant(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[SqlParam],
        timeout_ms: u64,
    ) -> Result<TenantExecutionResult, DatabaseError> {
        let tenant_id = sanitize_tenant_id(tenant_id)?;

        // statement_timeout = 0 would disable the server-side limit
        if timeout_ms == 0 {
            return Err(DatabaseError::Configuration(
                "statement timeout must be greater than zero".to_string(),
            ));
        }

        let start = Instant::now();
        let rows = execute_with_deadline(
            deadline_for(timeout_ms),
            self.run_in_transaction(&tenant_id, sql, params, timeout_ms),
            "Tenant query",
        )
        .await?;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        log::debug!(
            "Tenant query returned {} rows in {}ms",
            rows.len(),
            duration_ms
        );

        Ok(TenantExecutionResult {
            row_count: rows.len(),
            rows,
            duration_ms,
        })
    }
}

/// Set the transaction-local session context, then run the statement
async fn run_scoped(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    sql: &str,
    params: &[SqlParam],
    timeout_ms: u64,
) -> Result<Vec<Map<String, Value>>, DatabaseError> {
    sqlx::query("SELECT set_config('statement_timeout', $1, true)")
        .bind(format!("{}ms", timeout_ms))
        .execute(&mut **tx)
        .await?;

    sqlx::query("SELECT set_config($1, $2, true)")
        .bind(TENANT_SETTING)
        .bind(tenant_id)
        .execute(&mut **tx)
        .await?;

    let rows = bind_params(sqlx::query(sql), params)
        .fetch_all(&mut **tx)
        .await?;

    rows.iter().map(row_to_json).collect()
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(value) => query.bind(*value),
            SqlParam::Int(value) => query.bind(*value),
            SqlParam::Float(value) => query.bind(*value),
            SqlParam::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}
