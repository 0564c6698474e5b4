//! Hash-only audit records
//!
//! An `AuditRecord` describes one decision cycle without carrying any of
//! the payload: matched substrings and the payload itself are represented
//! only by a keyed HMAC-SHA256 digest.

use crate::engine::{Action, Decision, ReasonCode, RiskLevel};
use crate::error::{Error, Result};
use crate::finding::Span;
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Opaque correlation token shared by every record of one originating request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Fresh UUID v4 trace id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Reuse a caller-supplied trace id
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which step of the request lifecycle produced the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AssessInput,
    AssessOutput,
    AgentExecution,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AssessInput => "assess_input",
            AuditAction::AssessOutput => "assess_output",
            AuditAction::AgentExecution => "agent_execution",
        }
    }
}

/// Per-entity trace entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTrace {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub confidence: f64,
    /// `"start-end"` character offsets
    pub location: String,
    /// Keyed hash of the matched substring
    pub hash: String,
    pub disposition: Action,
}

/// Per-dimension safety score entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyTrace {
    pub dimension: String,
    pub score: f64,
    pub disposition: Action,
}

/// Compliance record for one decision cycle or agent execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub trace_id: TraceId,
    pub route: String,
    pub action: AuditAction,
    pub decision: Action,
    pub reason: ReasonCode,
    pub risk_level: RiskLevel,
    pub entities_detected: Vec<EntityTrace>,
    pub safety_scores: Vec<SafetyTrace>,
    pub policy_applied: String,
    pub processing_time_ms: f64,
    /// Length of the assessed payload in characters
    pub text_length: usize,
    pub input_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub redaction_conflicts: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl AuditRecord {
    /// PII types in this record, one per entity entry
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities_detected.iter().map(|e| e.entity_type.as_str())
    }
}

/// Timing and correlation data for one traced step
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub route: String,
    pub action: AuditAction,
    pub started_at: Instant,
    pub decided_at: Instant,
}

impl TraceContext {
    /// Start timing a step now.
    pub fn start(trace_id: TraceId, route: impl Into<String>, action: AuditAction) -> Self {
        let now = Instant::now();
        Self {
            trace_id,
            route: route.into(),
            action,
            started_at: now,
            decided_at: now,
        }
    }

    /// Mark the decision as complete.
    pub fn finish(mut self) -> Self {
        self.decided_at = Instant::now();
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.decided_at.saturating_duration_since(self.started_at)
    }
}

/// Outcome of an agent run, recorded without any of its content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub success: bool,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub steps: usize,
}

/// HMAC-SHA256 with a process-wide secret, hex encoded
pub struct KeyedHasher {
    key: hmac::Key,
}

impl fmt::Debug for KeyedHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedHasher").finish_non_exhaustive()
    }
}

impl KeyedHasher {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Random per-process key. Hashes are then only comparable within
    /// this process.
    pub fn random() -> Result<Self> {
        let rng = ring::rand::SystemRandom::new();
        let key = hmac::Key::generate(hmac::HMAC_SHA256, &rng)
            .map_err(|_| Error::Config("Failed to generate audit hash key".into()))?;
        Ok(Self { key })
    }

    /// Configured key, or a random one with a warning.
    pub fn from_config(secret: Option<&str>) -> Result<Self> {
        match secret {
            Some(secret) => Ok(Self::new(secret.as_bytes())),
            None => {
                tracing::warn!(
                    "No audit hash key configured, using a random per-process key; \
                     set ANZEN_AUDIT_HASH_KEY for hashes stable across restarts"
                );
                Self::random()
            }
        }
    }

    pub fn hash(&self, data: &str) -> String {
        hex::encode(hmac::sign(&self.key, data.as_bytes()).as_ref())
    }
}

/// Builds audit records from finished decisions
#[derive(Debug)]
pub struct AuditTraceBuilder {
    hasher: KeyedHasher,
}

impl AuditTraceBuilder {
    pub fn new(hasher: KeyedHasher) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &KeyedHasher {
        &self.hasher
    }

    /// Record for an assessed payload.
    pub fn build(&self, decision: &Decision, text: &str, ctx: &TraceContext) -> AuditRecord {
        let entities_detected = decision
            .entities()
            .map(|d| {
                // Empty hash marks a span that does not fit `text`.
                let hash = match d.finding.span.and_then(|span| char_slice(text, span)) {
                    Some(matched) => self.hasher.hash(matched),
                    None => {
                        tracing::warn!(
                            trace_id = %ctx.trace_id,
                            entity = %d.finding.label,
                            location = %d.finding.location(),
                            "Entity span does not fit payload, recording without hash"
                        );
                        String::new()
                    }
                };
                EntityTrace {
                    entity_type: d.finding.label.clone(),
                    confidence: d.finding.confidence,
                    location: d.finding.location(),
                    hash,
                    disposition: d.action,
                }
            })
            .collect();

        let safety_scores = decision
            .safety_scores()
            .map(|d| SafetyTrace {
                dimension: d.finding.label.clone(),
                score: d.finding.confidence,
                disposition: d.action,
            })
            .collect();

        AuditRecord {
            timestamp: Utc::now(),
            trace_id: ctx.trace_id.clone(),
            route: ctx.route.clone(),
            action: ctx.action,
            decision: decision.action,
            reason: decision.reason,
            risk_level: decision.risk_level,
            entities_detected,
            safety_scores,
            policy_applied: decision.policy_id.clone(),
            processing_time_ms: ctx.elapsed().as_secs_f64() * 1000.0,
            text_length: text.chars().count(),
            input_hash: self.hasher.hash(text),
            output_hash: decision.safe_text.as_deref().map(|t| self.hasher.hash(t)),
            redaction_conflicts: decision.conflicts.len(),
            metadata: BTreeMap::new(),
        }
    }

    /// Record for an agent execution step correlated by `ctx.trace_id`.
    pub fn agent_execution(&self, outcome: &AgentOutcome, ctx: &TraceContext) -> AuditRecord {
        let (decision, reason) = if outcome.success {
            (Action::Allow, ReasonCode::AgentCompleted)
        } else {
            (Action::Block, ReasonCode::AgentFailed)
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("success".to_string(), serde_json::json!(outcome.success));
        metadata.insert("steps".to_string(), serde_json::json!(outcome.steps));
        metadata.insert(
            "tools_used".to_string(),
            serde_json::json!(outcome.tools_used),
        );

        AuditRecord {
            timestamp: Utc::now(),
            trace_id: ctx.trace_id.clone(),
            route: ctx.route.clone(),
            action: AuditAction::AgentExecution,
            decision,
            reason,
            risk_level: RiskLevel::Low,
            entities_detected: Vec::new(),
            safety_scores: Vec::new(),
            policy_applied: String::new(),
            processing_time_ms: ctx.elapsed().as_secs_f64() * 1000.0,
            text_length: 0,
            input_hash: String::new(),
            output_hash: None,
            redaction_conflicts: 0,
            metadata,
        }
    }
}

/// Substring covered by a character span
fn char_slice(text: &str, span: Span) -> Option<&str> {
    let mut indices = text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()));
    let start = indices.nth(span.start)?;
    let end = indices.nth(span.len() - 1)?;
    text.get(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DecisionEngine;
    use crate::finding::Finding;
    use crate::policy::PolicyBuilder;

    fn builder() -> AuditTraceBuilder {
        AuditTraceBuilder::new(KeyedHasher::new(b"test-secret-key-0123456789"))
    }

    fn ctx() -> TraceContext {
        TraceContext::start(TraceId::generate(), "public:chat", AuditAction::AssessInput).finish()
    }

    #[test]
    fn test_char_slice() {
        let text = "Grüße an Jürgen";
        assert_eq!(char_slice(text, Span::new(9, 15).unwrap()), Some("Jürgen"));
        assert_eq!(char_slice(text, Span::new(0, 5).unwrap()), Some("Grüße"));
        assert_eq!(char_slice(text, Span::new(10, 40).unwrap()), None);
    }

    #[test]
    fn test_hash_is_keyed_and_stable() {
        let a = KeyedHasher::new(b"key-one-0123456789");
        let b = KeyedHasher::new(b"key-two-0123456789");
        assert_eq!(a.hash("john@example.com"), a.hash("john@example.com"));
        assert_ne!(a.hash("john@example.com"), b.hash("john@example.com"));
        assert_eq!(a.hash("x").len(), 64);
    }

    #[test]
    fn test_record_contains_hashes_not_values() {
        let text = "My SSN is 123-45-6789";
        let policy = PolicyBuilder::new("public:chat").block(["US_SSN"]).build();
        let decision = DecisionEngine::default().decide(
            &[Finding::pii("US_SSN", 0.95, Span::new(10, 21).unwrap())],
            &policy,
            text,
        );
        let builder = builder();
        let record = builder.build(&decision, text, &ctx());

        assert_eq!(record.reason, ReasonCode::PiiDetected);
        assert_eq!(record.decision, Action::Block);
        assert_eq!(record.entities_detected.len(), 1);
        let entity = &record.entities_detected[0];
        assert_eq!(entity.entity_type, "US_SSN");
        assert_eq!(entity.location, "10-21");
        assert_eq!(entity.hash, builder.hasher().hash("123-45-6789"));
        assert_eq!(record.text_length, 21);
        assert!(record.output_hash.is_none());

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("123-45-6789"));
        assert!(!json.contains("My SSN"));
        assert!(json.contains("\"action\":\"assess_input\""));
        assert!(json.contains("\"type\":\"US_SSN\""));
    }

    #[test]
    fn test_span_outside_text_records_empty_hash() {
        let text = "short";
        let policy = PolicyBuilder::new("public:chat").block(["US_SSN"]).build();
        let decision = DecisionEngine::default().decide(
            &[
                Finding::pii("US_SSN", 0.95, Span::new(2, 40).unwrap()),
                Finding::pii("US_SSN", 0.95, Span::new(1, 30).unwrap()),
            ],
            &policy,
            text,
        );
        let builder = builder();
        let record = builder.build(&decision, text, &ctx());

        assert_eq!(record.entities_detected.len(), 2);
        for entity in &record.entities_detected {
            assert!(entity.hash.is_empty());
            assert_ne!(entity.hash, builder.hasher().hash(""));
        }
        assert_eq!(record.entities_detected[0].location, "2-40");
    }

    #[test]
    fn test_safety_scores_have_no_text() {
        let text = "some hostile text";
        let policy = PolicyBuilder::new("public").risk_threshold(0.5).build();
        let decision =
            DecisionEngine::default().decide(&[Finding::safety("toxicity", 0.9)], &policy, text);
        let record = builder().build(&decision, text, &ctx());
        assert_eq!(record.safety_scores.len(), 1);
        assert_eq!(record.safety_scores[0].dimension, "toxicity");
        assert_eq!(record.safety_scores[0].disposition, Action::Block);
        assert!(record.entities_detected.is_empty());
    }

    #[test]
    fn test_agent_execution_record() {
        let trace_id = TraceId::generate();
        let ctx = TraceContext::start(trace_id.clone(), "public:agent", AuditAction::AgentExecution)
            .finish();
        let outcome = AgentOutcome {
            success: true,
            tools_used: vec!["weather".into()],
            steps: 2,
        };
        let record = builder().agent_execution(&outcome, &ctx);
        assert_eq!(record.trace_id, trace_id);
        assert_eq!(record.reason, ReasonCode::AgentCompleted);
        assert_eq!(record.metadata["tools_used"], serde_json::json!(["weather"]));

        let failed = builder().agent_execution(&AgentOutcome::default(), &ctx);
        assert_eq!(failed.reason, ReasonCode::AgentFailed);
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let text = "Email me at john@example.com";
        let policy = PolicyBuilder::new("public").redact(["EMAIL_ADDRESS"]).build();
        let decision = DecisionEngine::default().decide(
            &[Finding::pii("EMAIL_ADDRESS", 0.8, Span::new(12, 28).unwrap())],
            &policy,
            text,
        );
        let mut record = builder().build(&decision, text, &ctx());
        record.processing_time_ms = 1.5;
        let json = serde_json::to_string(&record).unwrap();
        let back: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert!(back.output_hash.is_some());
    }

    #[test]
    fn test_random_key() {
        let a = KeyedHasher::random().unwrap();
        let b = KeyedHasher::random().unwrap();
        assert_ne!(a.hash("same"), b.hash("same"));
    }
}
