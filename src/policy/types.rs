//! Effective policy rule set for a route

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Rejection message used when a policy does not configure one
pub const DEFAULT_REJECTION_MESSAGE: &str = "[BLOCKED: Contains sensitive information]";

/// Identifier of the hard-coded fallback policy
pub const DEFAULT_POLICY_ID: &str = "default";

/// Set of entity labels a rule applies to
///
/// Serialized as a list of labels; the single label `"*"` means every
/// entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum EntitySet {
    All,
    Only(BTreeSet<String>),
}

impl EntitySet {
    pub fn none() -> Self {
        EntitySet::Only(BTreeSet::new())
    }

    pub fn contains(&self, label: &str) -> bool {
        match self {
            EntitySet::All => true,
            EntitySet::Only(labels) => labels.contains(label),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, EntitySet::Only(labels) if labels.is_empty())
    }
}

impl Default for EntitySet {
    fn default() -> Self {
        EntitySet::none()
    }
}

impl From<Vec<String>> for EntitySet {
    fn from(labels: Vec<String>) -> Self {
        let labels: BTreeSet<String> = labels
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if labels.contains("*") {
            EntitySet::All
        } else {
            EntitySet::Only(labels)
        }
    }
}

impl From<EntitySet> for Vec<String> {
    fn from(set: EntitySet) -> Self {
        match set {
            EntitySet::All => vec!["*".to_string()],
            EntitySet::Only(labels) => labels.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[&str; N]> for EntitySet {
    fn from(labels: [&str; N]) -> Self {
        labels
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .into()
    }
}

/// Effective rule set for a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy identifier recorded in audit trails (the matched route prefix)
    pub id: String,
    /// Labels that force BLOCK; takes precedence over `redact_entities`
    pub block_entities: EntitySet,
    /// Labels that force masking but not blocking
    pub redact_entities: EntitySet,
    /// Safety scores at or above this value force BLOCK
    pub risk_threshold: f64,
    /// Per-entity confidence floors; findings below their floor are allowed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub min_confidence: BTreeMap<String, f64>,
    /// Fixed message substituted for blocked payloads
    pub rejection_message: String,
}

impl Policy {
    /// Maximally restrictive fallback: block every entity, redact nothing,
    /// block any safety score.
    pub fn restrictive_default() -> Self {
        Self {
            id: DEFAULT_POLICY_ID.to_string(),
            block_entities: EntitySet::All,
            redact_entities: EntitySet::none(),
            risk_threshold: 0.0,
            min_confidence: BTreeMap::new(),
            rejection_message: DEFAULT_REJECTION_MESSAGE.to_string(),
        }
    }

    /// Confidence floor for an entity label (0.0 when not configured)
    pub fn confidence_floor(&self, label: &str) -> f64 {
        self.min_confidence.get(label).copied().unwrap_or(0.0)
    }
}

/// Builder for creating policies in code
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    /// Start from a permissive rule set: nothing blocked or redacted,
    /// safety threshold 1.0.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            policy: Policy {
                id: id.into(),
                block_entities: EntitySet::none(),
                redact_entities: EntitySet::none(),
                risk_threshold: 1.0,
                min_confidence: BTreeMap::new(),
                rejection_message: DEFAULT_REJECTION_MESSAGE.to_string(),
            },
        }
    }

    pub fn block(mut self, labels: impl Into<EntitySet>) -> Self {
        self.policy.block_entities = labels.into();
        self
    }

    pub fn redact(mut self, labels: impl Into<EntitySet>) -> Self {
        self.policy.redact_entities = labels.into();
        self
    }

    pub fn risk_threshold(mut self, threshold: f64) -> Self {
        self.policy.risk_threshold = threshold;
        self
    }

    pub fn min_confidence(mut self, label: impl Into<String>, floor: f64) -> Self {
        self.policy.min_confidence.insert(label.into(), floor);
        self
    }

    pub fn rejection_message(mut self, message: impl Into<String>) -> Self {
        self.policy.rejection_message = message.into();
        self
    }

    pub fn build(self) -> Policy {
        self.policy
    }
}
