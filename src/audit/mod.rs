//! Audit trace generation and storage
//!
//! `record` builds hash-only records, `trail` moves them off the decision
//! path, and `log` / `persistence` are the bundled sinks. `report`
//! aggregates stored records into compliance statistics.

pub mod log;
pub mod persistence;
pub mod record;
pub mod report;
pub mod trail;

pub use log::{AuditLog, MemorySink};
pub use persistence::{route_matches, AuditPersistence, AuditQueryFilter, PersistenceConfig};
pub use record::{
    AgentOutcome, AuditAction, AuditRecord, AuditTraceBuilder, EntityTrace, KeyedHasher,
    SafetyTrace, TraceContext, TraceId,
};
pub use report::{ComplianceReport, ReportScope, RouteBreakdown};
pub use trail::{AuditSink, AuditTrail, RetryPolicy};
