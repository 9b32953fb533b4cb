//! Collaborator seams
//!
//! The core asks RBAC whether a principal may invoke an operation and feeds
//! the audit log one record per mutating operation. Both collaborators live
//! outside the core; these traits are the only contact surface.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// The caller of an operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    #[serde(default)]
    pub superuser: bool,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superuser: false,
        }
    }

    /// Identity used by operations the engine issues on its own behalf
    pub fn system() -> Self {
        Self {
            name: "system".to_string(),
            superuser: true,
        }
    }
}

/// Permission check delegated to RBAC
pub trait PermissionChecker: Send + Sync {
    /// Answer whether `principal` may run `operation` against `object`
    fn has_permission(&self, principal: &Principal, operation: &str, object: &str) -> bool;
}

/// Permission checker granting everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn has_permission(&self, _principal: &Principal, _operation: &str, _object: &str) -> bool {
        true
    }
}

/// Outcome recorded in the audit log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Fail,
    Denied,
}

/// One audit log entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub operation: String,
    pub object: Option<String>,
    pub result: AuditResult,
    pub actor: String,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        operation: impl Into<String>,
        object: Option<String>,
        result: AuditResult,
        actor: &Principal,
    ) -> Self {
        Self {
            operation: operation.into(),
            object,
            result,
            actor: actor.name.clone(),
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Sink receiving audit records
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Audit sink writing records as tracing events on the `adcm_audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "adcm_audit",
            operation = %record.operation,
            object = record.object.as_deref().unwrap_or("-"),
            result = ?record.result,
            actor = %record.actor,
            detail = record.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// Audit sink keeping records in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Records whose operation name equals `operation`
    pub fn by_operation(&self, operation: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.has_permission(&Principal::new("bob"), "run_action", "cluster 1"));
    }

    #[test]
    fn test_memory_audit_sink() {
        let sink = MemoryAuditSink::new();
        let actor = Principal::new("admin");
        sink.record(AuditRecord::new(
            "create_cluster",
            Some("cluster 1".into()),
            AuditResult::Success,
            &actor,
        ));
        sink.record(
            AuditRecord::new("delete_cluster", None, AuditResult::Fail, &actor)
                .with_detail("locked"),
        );

        assert_eq!(sink.records().len(), 2);
        let failed = sink.by_operation("delete_cluster");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].detail.as_deref(), Some("locked"));
        assert_eq!(failed[0].actor, "admin");
    }
}
