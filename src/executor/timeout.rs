//! Client-side deadlines for database operations
//!
//! The server-side `statement_timeout` is the primary limit. This deadline
//! also covers pool acquisition and commit, and catches a server that stops
//! answering altogether. Nothing here retries: a query that timed out once
//! is not re-run against a tenant's data.

use crate::error::DatabaseError;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Extra time granted beyond the statement timeout for BEGIN, set_config and COMMIT
pub const DEADLINE_GRACE: Duration = Duration::from_millis(2_000);

/// Client-side deadline for a statement that the server limits to `statement_timeout_ms`
pub fn deadline_for(statement_timeout_ms: u64) -> Duration {
    Duration::from_millis(statement_timeout_ms) + DEADLINE_GRACE
}

/// Run `operation`, failing with [`DatabaseError::Timeout`] if it outlives `limit`
///
/// # Example
///
/// ```rust
/// # use cloudintel_nl2sql::executor::timeout::execute_with_deadline;
/// # use std::time::Duration;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), cloudintel_nl2sql::error::DatabaseError> {
/// let rows = execute_with_deadline(
///     Duration::from_secs(1),
///     async { Ok::<Vec<u32>, cloudintel_nl2sql::error::DatabaseError>(vec![1, 2]) },
///     "Counting people",
/// )
/// .await?;
/// assert_eq!(rows.len(), 2);
/// # Ok(())
/// # }
/// ```
pub async fn execute_with_deadline<T, E, Fut>(
    limit: Duration,
    operation: Fut,
    operation_description: &str,
) -> Result<T, DatabaseError>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<DatabaseError>,
{
    match timeout(limit, operation).await {
        Ok(result) => result.map_err(Into::into),
        Err(_elapsed) => {
            log::warn!("{} exceeded client deadline of {:?}", operation_description, limit);
            Err(DatabaseError::Timeout(format!(
                "{} timed out after {:?}. \
                 Narrow the question (add filters or a smaller date range) so the query touches fewer rows.",
                operation_description, limit
            )))
        }
    }
}
