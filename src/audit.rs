//! Audit trail for answered, rejected and failed questions
//!
//! Recording is fire-and-forget: [`record_detached`] hands the entry to a
//! spawned task, so the caller neither waits for the sink nor sees its
//! failures.

use crate::error::AuditError;
use crate::types::AuditEntry;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Log target used by [`LogAuditSink`]
pub const AUDIT_TARGET: &str = "audit";

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Writes each entry as one JSON line on the `audit` log target
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = serde_json::to_string(entry)?;
        log::info!(target: AUDIT_TARGET, "{}", line);
        Ok(())
    }
}

/// Record `entry` on a background task, logging (never returning) any failure
///
/// The handle is only useful to tests; production callers drop it.
pub fn record_detached(sink: Arc<dyn AuditSink>, entry: AuditEntry) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sink.record(&entry).await {
            log::warn!(
                "Failed to write audit entry (tenant {}, status {:?}): {}",
                entry.tenant_id,
                entry.status,
                e
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuditStatus;
    use chrono::Utc;
    use std::sync::Mutex;

    fn entry(status: AuditStatus) -> AuditEntry {
        AuditEntry {
            tenant_id: "0f8fad5b-d9cb-469f-a165-70867728950e".to_string(),
            user_id: "analyst@example.com".to_string(),
            question: "who has admin?".to_string(),
            sql_executed: String::new(),
            row_count: 0,
            duration_ms: 0,
            status,
            rejection_reason: None,
            recorded_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct MemorySink {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait]
    impl AuditSink for MemorySink {
        async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
            match self.entries.lock() {
                Ok(mut entries) => {
                    entries.push(entry.clone());
                    Ok(())
                }
                Err(_) => Err(AuditError::Write("poisoned".to_string())),
            }
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::Write("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_detached_record_reaches_sink() {
        let sink = Arc::new(MemorySink::default());
        let handle = record_detached(sink.clone(), entry(AuditStatus::Success));
        assert!(handle.await.is_ok());
        let count = sink.entries.lock().map(|e| e.len()).unwrap_or(0);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let handle = record_detached(Arc::new(FailingSink), entry(AuditStatus::Error));
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_log_sink_serializes() {
        let mut rejected = entry(AuditStatus::Rejected);
        rejected.rejection_reason = Some("Table 'secrets' is not in the allowed list".to_string());
        assert!(LogAuditSink.record(&rejected).await.is_ok());

        let json = serde_json::to_value(&rejected).unwrap_or_default();
        assert_eq!(json["status"], "rejected");
        assert!(json.get("rejection_reason").is_some());
    }
}
