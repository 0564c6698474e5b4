//! Compliance reporting over audit records

use super::persistence::route_matches;
use super::record::{AuditAction, AuditRecord};
use crate::engine::{Action, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reporting window and optional route filter (`public:*` style)
#[derive(Debug, Clone, Default)]
pub struct ReportScope {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub route: Option<String>,
}

impl ReportScope {
    fn includes(&self, record: &AuditRecord) -> bool {
        self.from.map_or(true, |from| record.timestamp >= from)
            && self.to.map_or(true, |to| record.timestamp <= to)
            && self
                .route
                .as_deref()
                .map_or(true, |filter| route_matches(filter, &record.route))
    }
}

/// Decision counts for one route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBreakdown {
    pub total: usize,
    pub allowed: usize,
    pub redacted: usize,
    pub blocked: usize,
}

impl RouteBreakdown {
    fn count(&mut self, decision: Action) {
        self.total += 1;
        match decision {
            Action::Allow => self.allowed += 1,
            Action::Redact => self.redacted += 1,
            Action::Block => self.blocked += 1,
        }
    }
}

/// Aggregate statistics over assessed payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub route_filter: Option<String>,
    pub total_requests: usize,
    pub allowed_requests: usize,
    pub redacted_requests: usize,
    pub blocked_requests: usize,
    /// Blocked / total, 0 when there are no requests
    pub block_rate: f64,
    /// Redacted / total, 0 when there are no requests
    pub redaction_rate: f64,
    pub pii_types: BTreeMap<String, usize>,
    pub routes: BTreeMap<String, RouteBreakdown>,
    pub risk_levels: BTreeMap<RiskLevel, usize>,
    pub agent_executions: usize,
    pub avg_processing_time_ms: f64,
    pub total_processing_time_ms: f64,
}

impl ComplianceReport {
    /// Build a report from `records` restricted to `scope`.
    ///
    /// Agent-execution records are counted separately and do not enter
    /// the decision statistics.
    pub fn build<'a>(
        records: impl IntoIterator<Item = &'a AuditRecord>,
        scope: &ReportScope,
    ) -> Self {
        let mut report = ComplianceReport {
            period_start: scope.from,
            period_end: scope.to,
            route_filter: scope.route.clone(),
            ..Default::default()
        };
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            report.risk_levels.insert(level, 0);
        }

        let mut totals = RouteBreakdown::default();
        for record in records.into_iter().filter(|r| scope.includes(r)) {
            if record.action == AuditAction::AgentExecution {
                report.agent_executions += 1;
                continue;
            }

            totals.count(record.decision);
            report
                .routes
                .entry(record.route.clone())
                .or_default()
                .count(record.decision);
            *report.risk_levels.entry(record.risk_level).or_default() += 1;
            for entity_type in record.entity_types() {
                *report.pii_types.entry(entity_type.to_string()).or_default() += 1;
            }
            report.total_processing_time_ms += record.processing_time_ms;
        }

        report.total_requests = totals.total;
        report.allowed_requests = totals.allowed;
        report.redacted_requests = totals.redacted;
        report.blocked_requests = totals.blocked;
        if totals.total > 0 {
            let total = totals.total as f64;
            report.block_rate = totals.blocked as f64 / total;
            report.redaction_rate = totals.redacted as f64 / total;
            report.avg_processing_time_ms = report.total_processing_time_ms / total;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::record::{EntityTrace, TraceId};
    use crate::engine::ReasonCode;

    fn record(route: &str, decision: Action, risk: RiskLevel, entities: &[&str]) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            trace_id: TraceId::generate(),
            route: route.into(),
            action: AuditAction::AssessInput,
            decision,
            reason: ReasonCode::Clean,
            risk_level: risk,
            entities_detected: entities
                .iter()
                .map(|t| EntityTrace {
                    entity_type: t.to_string(),
                    confidence: 0.9,
                    location: "0-1".into(),
                    hash: "ab".into(),
                    disposition: decision,
                })
                .collect(),
            safety_scores: Vec::new(),
            policy_applied: route.into(),
            processing_time_ms: 2.0,
            text_length: 1,
            input_hash: String::new(),
            output_hash: None,
            redaction_conflicts: 0,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_report_counts_and_rates() {
        let mut agent = record("public:agent", Action::Allow, RiskLevel::Low, &[]);
        agent.action = AuditAction::AgentExecution;
        let records = vec![
            record("public:chat", Action::Block, RiskLevel::High, &["US_SSN"]),
            record("public:chat", Action::Redact, RiskLevel::High, &["EMAIL_ADDRESS"]),
            record("private:ops", Action::Allow, RiskLevel::Low, &[]),
            record(
                "public:forum",
                Action::Redact,
                RiskLevel::Medium,
                &["EMAIL_ADDRESS", "PERSON"],
            ),
            agent,
        ];

        let report = ComplianceReport::build(&records, &ReportScope::default());
        assert_eq!(report.total_requests, 4);
        assert_eq!(report.blocked_requests, 1);
        assert_eq!(report.redacted_requests, 2);
        assert_eq!(report.agent_executions, 1);
        assert_eq!(report.block_rate, 0.25);
        assert_eq!(report.redaction_rate, 0.5);
        assert_eq!(report.pii_types["EMAIL_ADDRESS"], 2);
        assert_eq!(report.routes["public:chat"].blocked, 1);
        assert_eq!(report.routes["public:chat"].total, 2);
        assert_eq!(report.risk_levels[&RiskLevel::High], 2);
        assert_eq!(report.total_processing_time_ms, 8.0);
        assert_eq!(report.avg_processing_time_ms, 2.0);
    }

    #[test]
    fn test_report_route_filter() {
        let records = vec![
            record("public:chat", Action::Block, RiskLevel::High, &["US_SSN"]),
            record("private:ops", Action::Allow, RiskLevel::Low, &[]),
        ];
        let scope = ReportScope {
            route: Some("public:*".into()),
            ..Default::default()
        };
        let report = ComplianceReport::build(&records, &scope);
        assert_eq!(report.total_requests, 1);
        assert!(!report.routes.contains_key("private:ops"));
    }

    #[test]
    fn test_empty_report_has_zero_rates() {
        let report = ComplianceReport::build(std::iter::empty(), &ReportScope::default());
        assert_eq!(report.total_requests, 0);
        assert_eq!(report.block_rate, 0.0);
        assert_eq!(report.risk_levels[&RiskLevel::Low], 0);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["risk_levels"]["medium"], 0);
    }
}
