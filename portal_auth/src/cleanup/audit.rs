//! Audit trail for cleanups.

use crate::session::PurgeCounts;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// One cleanup as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub counts: PurgeCounts,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: AuditRecord);

    /// Newest records first.
    async fn recent(&self, limit: usize) -> Vec<AuditRecord>;
}

/// Bounded in-memory audit trail. Oldest records are dropped first.
pub struct MemoryAuditLog {
    records: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl MemoryAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) {
        log::info!(
            "AUDIT {} by {} at {}: sessions={} tokens={} cache={}",
            record.action,
            record.actor,
            record.timestamp.to_rfc3339(),
            record.counts.sessions_cleared,
            record.counts.tokens_cleared,
            record.counts.cache_cleared
        );
        let mut records = self.records.lock().await;
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    async fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.records
            .lock()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}
