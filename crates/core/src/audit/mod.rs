//! Audit trail of issued signed URLs.
//!
//! Every issuance is reported before the URL is returned. A failing sink is
//! logged by the broker and never blocks issuance.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldvault_shared::Platform;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::broker::Action;

/// Log target carrying audit events.
pub const AUDIT_TARGET: &str = "fieldvault::audit";

/// Audit sink errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not store the entry.
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// One issued URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// Entry id, time ordered.
    pub id: Uuid,
    /// Acting user, if known.
    pub actor: Option<String>,
    /// Field the file belongs to.
    pub field_name: String,
    /// File name or stored path the caller asked for.
    pub file_name: String,
    /// Object key the URL points at.
    pub object_key: String,
    /// Upload or download.
    pub action: Action,
    /// Platform that signed the URL.
    pub platform: Platform,
    /// Record the file belongs to, if known.
    pub record_id: Option<String>,
    /// When the URL was issued.
    pub timestamp: DateTime<Utc>,
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Store one entry.
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Emits entries as `tracing` events on [`AUDIT_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        info!(
            target: AUDIT_TARGET,
            id = %entry.id,
            actor = entry.actor.as_deref().unwrap_or("-"),
            field = %entry.field_name,
            file = %entry.file_name,
            key = %entry.object_key,
            action = %entry.action,
            platform = %entry.platform,
            record_id = entry.record_id.as_deref().unwrap_or("-"),
            timestamp = %entry.timestamp.to_rfc3339(),
            "Signed URL issued"
        );
        Ok(())
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries recorded so far, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> AuditEntry {
        AuditEntry {
            id: Uuid::now_v7(),
            actor: Some("alice".to_string()),
            field_name: "photo_field".to_string(),
            file_name: "scan.pdf".to_string(),
            object_key: "prefix/42/photo_field/scan.pdf".to_string(),
            action: Action::Upload,
            platform: Platform::Google,
            record_id: Some("42".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        let first = entry();
        let second = AuditEntry {
            action: Action::Download,
            ..entry()
        };

        sink.record(&first).await.unwrap();
        sink.record(&second).await.unwrap();

        assert_eq!(sink.entries(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        assert!(TracingAuditSink.record(&entry()).await.is_ok());
    }

    #[test]
    fn test_entry_serializes_action_lowercase() {
        let json = serde_json::to_value(entry()).unwrap();
        assert_eq!(json["action"], "upload");
        assert_eq!(json["platform"], "GOOGLE");
    }
}
