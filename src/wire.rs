//! JSON request/response shapes of the check API

use crate::audit::TraceId;
use crate::engine::{Action, RiskLevel};
use crate::gateway::{Assessment, Direction, EntitySummary};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const DEFAULT_ROUTE: &str = "public:chat";
pub const DEFAULT_LANGUAGE: &str = "en";

fn default_route() -> String {
    DEFAULT_ROUTE.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Check request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub text: String,
    #[serde(default = "default_route")]
    pub route: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
}

impl CheckRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            route: default_route(),
            language: default_language(),
            direction: Direction::Input,
            trace_id: None,
        }
    }
}

/// Check response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub decision: Action,
    /// Safe text, or the rejection message when blocked
    pub safe_text: String,
    pub entities: Vec<EntitySummary>,
    pub risk_level: RiskLevel,
    pub trace_id: TraceId,
    pub metadata: Map<String, Value>,
}

impl CheckResponse {
    pub fn from_assessment(assessment: &Assessment, language: &str) -> Self {
        let decision = &assessment.decision;
        let safety_scores: Vec<Value> = decision
            .safety_scores()
            .map(|d| {
                json!({
                    "dimension": d.finding.label,
                    "score": d.finding.confidence,
                    "action": d.action,
                })
            })
            .collect();

        let mut metadata = Map::new();
        metadata.insert("reason".into(), json!(decision.reason));
        metadata.insert("policy_id".into(), json!(decision.policy_id));
        metadata.insert("direction".into(), json!(assessment.direction));
        metadata.insert("language".into(), json!(language));
        metadata.insert(
            "processing_time_ms".into(),
            json!(assessment.processing_time_ms),
        );
        metadata.insert("safety_scores".into(), Value::Array(safety_scores));
        if !decision.conflicts.is_empty() {
            metadata.insert(
                "redaction_conflicts".into(),
                json!(decision.conflicts.len()),
            );
        }
        if assessment.dropped_findings > 0 {
            metadata.insert(
                "dropped_findings".into(),
                json!(assessment.dropped_findings),
            );
        }

        Self {
            decision: decision.action,
            safe_text: assessment.delivered_text().to_string(),
            entities: assessment.entities(),
            risk_level: decision.risk_level,
            trace_id: assessment.trace_id.clone(),
            metadata,
        }
    }
}
