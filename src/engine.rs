//! Decision engine
//!
//! Applies one policy to a set of normalized findings. Every finding gets a
//! disposition; the overall action is the maximum disposition under
//! `Allow < Redact < Block`, so the result does not depend on the order in
//! which findings are evaluated.

use crate::error::{Error, Result};
use crate::finding::Finding;
use crate::policy::Policy;
use crate::redactor::{RedactionConflict, Redactor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict for a finding or a whole payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Allow,
    Redact,
    Block,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "ALLOW",
            Action::Redact => "REDACT",
            Action::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finding with the action taken on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disposition {
    pub finding: Finding,
    pub action: Action,
}

/// Three-tier risk bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence cut-offs mapping the maximum finding confidence to a `RiskLevel`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskBands {
    pub high: f64,
    pub medium: f64,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.6,
        }
    }
}

impl RiskBands {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.high) || !in_unit(self.medium) || self.medium > self.high {
            return Err(Error::Config(format!(
                "risk_levels must satisfy 0 <= medium <= high <= 1 (medium = {}, high = {})",
                self.medium, self.high
            )));
        }
        Ok(())
    }

    /// Bucket for the maximum confidence over `findings`
    pub fn level<'a>(&self, findings: impl IntoIterator<Item = &'a Finding>) -> RiskLevel {
        let max = findings
            .into_iter()
            .map(|f| f.confidence)
            .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.max(c))));
        match max {
            Some(c) if c >= self.high => RiskLevel::High,
            Some(c) if c >= self.medium => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

/// Machine-readable explanation of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// A PII finding was blocked
    PiiDetected,
    /// A safety dimension reached the risk threshold
    UnsafeContent,
    PiiRedacted,
    /// Findings were observed but all permitted
    Allowed,
    /// No findings
    Clean,
    /// Decision computation failed; blocked
    InternalError,
    /// A detector could not produce findings; blocked
    DetectorFailure,
    AgentCompleted,
    AgentFailed,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::PiiDetected => "PII_DETECTED",
            ReasonCode::UnsafeContent => "UNSAFE_CONTENT",
            ReasonCode::PiiRedacted => "PII_REDACTED",
            ReasonCode::Allowed => "ALLOWED",
            ReasonCode::Clean => "CLEAN",
            ReasonCode::InternalError => "INTERNAL_ERROR",
            ReasonCode::DetectorFailure => "DETECTOR_FAILURE",
            ReasonCode::AgentCompleted => "AGENT_COMPLETED",
            ReasonCode::AgentFailed => "AGENT_FAILED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict over one payload
///
/// `safe_text` is `None` on BLOCK; on ALLOW it is the input unchanged and on
/// REDACT the masked text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub safe_text: Option<String>,
    pub dispositions: Vec<Disposition>,
    pub risk_level: RiskLevel,
    pub reason: ReasonCode,
    pub policy_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<RedactionConflict>,
}

impl Decision {
    /// BLOCK decision without text, used whenever the pipeline cannot
    /// complete normally.
    pub fn fail_closed(
        policy_id: impl Into<String>,
        reason: ReasonCode,
        dispositions: Vec<Disposition>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            action: Action::Block,
            safe_text: None,
            dispositions,
            risk_level,
            reason,
            policy_id: policy_id.into(),
            conflicts: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.action == Action::Block
    }

    /// Dispositions for PII findings only
    pub fn entities(&self) -> impl Iterator<Item = &Disposition> {
        self.dispositions.iter().filter(|d| d.finding.is_pii())
    }

    /// Dispositions for safety dimensions only
    pub fn safety_scores(&self) -> impl Iterator<Item = &Disposition> {
        self.dispositions.iter().filter(|d| !d.finding.is_pii())
    }
}

/// Aggregate dispositions: the maximum action, ALLOW when empty.
pub fn aggregate<'a>(dispositions: impl IntoIterator<Item = &'a Disposition>) -> Action {
    dispositions
        .into_iter()
        .map(|d| d.action)
        .max()
        .unwrap_or(Action::Allow)
}

/// Decision engine
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    risk_bands: RiskBands,
    redactor: Redactor,
}

impl DecisionEngine {
    pub fn new(risk_bands: RiskBands) -> Self {
        Self {
            risk_bands,
            redactor: Redactor::new(),
        }
    }

    pub fn risk_bands(&self) -> &RiskBands {
        &self.risk_bands
    }

    /// Disposition of a single finding under `policy`
    pub fn disposition(&self, finding: &Finding, policy: &Policy) -> Action {
        if finding.is_pii() {
            if finding.confidence < policy.confidence_floor(&finding.label) {
                Action::Allow
            } else if policy.block_entities.contains(&finding.label) {
                Action::Block
            } else if policy.redact_entities.contains(&finding.label) {
                Action::Redact
            } else {
                Action::Allow
            }
        } else if finding.confidence >= policy.risk_threshold {
            Action::Block
        } else {
            Action::Allow
        }
    }

    /// Decide over `findings` for `text` under `policy`.
    pub fn decide(&self, findings: &[Finding], policy: &Policy, text: &str) -> Decision {
        let dispositions: Vec<Disposition> = findings
            .iter()
            .map(|finding| Disposition {
                action: self.disposition(finding, policy),
                finding: finding.clone(),
            })
            .collect();
        let risk_level = self.risk_bands.level(findings);

        match aggregate(&dispositions) {
            Action::Block => {
                let reason = if dispositions
                    .iter()
                    .any(|d| d.action == Action::Block && d.finding.is_pii())
                {
                    ReasonCode::PiiDetected
                } else {
                    ReasonCode::UnsafeContent
                };
                Decision::fail_closed(policy.id.clone(), reason, dispositions, risk_level)
            }
            Action::Redact => {
                let to_mask: Vec<Finding> = dispositions
                    .iter()
                    .filter(|d| d.action == Action::Redact)
                    .map(|d| d.finding.clone())
                    .collect();
                match self.redactor.redact(text, &to_mask) {
                    Ok(redaction) => Decision {
                        action: Action::Redact,
                        safe_text: Some(redaction.text),
                        dispositions,
                        risk_level,
                        reason: ReasonCode::PiiRedacted,
                        policy_id: policy.id.clone(),
                        conflicts: redaction.conflicts,
                    },
                    Err(e) => {
                        tracing::error!(error = %e, policy = %policy.id, "Redaction failed, blocking");
                        Decision::fail_closed(
                            policy.id.clone(),
                            ReasonCode::InternalError,
                            dispositions,
                            risk_level,
                        )
                    }
                }
            }
            Action::Allow => Decision {
                action: Action::Allow,
                safe_text: Some(text.to_string()),
                reason: if dispositions.is_empty() {
                    ReasonCode::Clean
                } else {
                    ReasonCode::Allowed
                },
                dispositions,
                risk_level,
                policy_id: policy.id.clone(),
                conflicts: Vec::new(),
            },
        }
    }
}
