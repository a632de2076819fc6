//! Audit trail port and in-memory implementation.
//!
//! Every mutating circulation operation records exactly one entry, whether it
//! succeeded or was rejected.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One audited operation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Who initiated the operation (member id or staff identifier).
    pub actor: String,
    /// Dotted operation name, e.g. `"loan.checkout"`.
    pub action: &'static str,
    pub entity: &'static str,
    /// Id of the primary entity, when one exists.
    pub entity_id: Option<String>,
    /// Resulting record serialized as JSON, on success.
    pub after_state: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Error)]
#[error("audit write failed: {0}")]
pub struct AuditError(pub String);

/// Trait for recording the audit trail.
#[async_trait]
pub trait AuditPort: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

#[derive(Debug, Default)]
struct InMemoryAuditState {
    entries: Vec<AuditEntry>,
    fail_on_record: bool,
}

/// In-memory audit log for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditLog {
    state: Arc<RwLock<InMemoryAuditState>>,
}

impl InMemoryAuditLog {
    /// Creates a new in-memory audit log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the log to fail writes.
    pub fn set_fail_on_record(&self, fail: bool) {
        self.state.write().unwrap().fail_on_record = fail;
    }

    /// Returns all entries recorded so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.state.read().unwrap().entries.clone()
    }

    /// Returns entries for the given action name.
    pub fn entries_for(&self, action: &str) -> Vec<AuditEntry> {
        self.state
            .read()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditPort for InMemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_record {
            return Err(AuditError("audit sink unavailable".to_string()));
        }
        state.entries.push(entry);
        Ok(())
    }
}
