//! In-memory audit log with bounded capacity

use super::persistence::AuditQueryFilter;
use super::record::AuditRecord;
use super::trail::AuditSink;
use crate::config::AuditConfig;
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bounded buffer of recent audit records
#[derive(Debug)]
pub struct AuditLog {
    records: VecDeque<Arc<AuditRecord>>,
    capacity: usize,
    /// Total records ever recorded (including evicted)
    total_count: u64,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            total_count: 0,
        }
    }

    pub fn record(&mut self, record: Arc<AuditRecord>) {
        tracing::debug!(
            trace_id = %record.trace_id,
            route = %record.route,
            decision = %record.decision,
            reason = %record.reason,
            "Audit record"
        );

        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.total_count += 1;
    }

    /// Recent records, newest first
    pub fn recent(&self, limit: usize) -> Vec<&AuditRecord> {
        self.records.iter().rev().take(limit).map(Arc::as_ref).collect()
    }

    /// All records sharing a trace id, oldest first
    pub fn by_trace(&self, trace_id: &str) -> Vec<&AuditRecord> {
        self.records
            .iter()
            .filter(|r| r.trace_id.as_str() == trace_id)
            .map(Arc::as_ref)
            .collect()
    }

    /// Records matching `filter`, newest first
    pub fn query(&self, filter: &AuditQueryFilter) -> Vec<&AuditRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(Arc::as_ref)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter().map(Arc::as_ref)
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Sink feeding a shared in-memory `AuditLog`
#[derive(Debug, Clone)]
pub struct MemorySink {
    log: Arc<RwLock<AuditLog>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Arc::new(RwLock::new(AuditLog::new(capacity))),
        }
    }

    /// Sink sized by `audit.memory_capacity`
    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.memory_capacity)
    }

    pub fn log(&self) -> &Arc<RwLock<AuditLog>> {
        &self.log
    }
}

#[async_trait::async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, record: &AuditRecord) -> Result<()> {
        self.log.write().await.record(Arc::new(record.clone()));
        Ok(())
    }
}
