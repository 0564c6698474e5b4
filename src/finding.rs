//! Uniform finding model shared by every stage of the decision cycle
//!
//! Detectors hand us loosely-typed tuples (`RawEntity`, `RawScore`). The
//! normalizer turns those into `Finding`s whose invariants hold by
//! construction: confidence in `[0, 1]` and, for PII entities, a non-empty
//! half-open character span inside the source text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which detector family produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    /// Structured PII entity with a span (email, SSN, ...)
    PiiEntity,
    /// Content-safety score without a span (toxicity, hate speech, ...)
    SafetyDimension,
}

/// Half-open range `[start, end)` of character offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Create a span, returning `None` unless `start < end`
    pub fn new(start: usize, end: usize) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Number of characters covered
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Spans are never empty by construction
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether two spans share at least one character
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Location descriptor used on the wire and in audit records
    pub fn location(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One detected signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    /// Entity type (e.g. `EMAIL_ADDRESS`) or safety dimension (e.g. `toxicity`)
    pub label: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Finding {
    /// Build a PII finding. Confidence is clamped into `[0, 1]`.
    pub fn pii(label: impl Into<String>, confidence: f64, span: Span) -> Self {
        Self {
            kind: FindingKind::PiiEntity,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            span: Some(span),
        }
    }

    /// Build a safety-dimension finding. Confidence is clamped into `[0, 1]`.
    pub fn safety(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: FindingKind::SafetyDimension,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            span: None,
        }
    }

    pub fn is_pii(&self) -> bool {
        self.kind == FindingKind::PiiEntity
    }

    /// Location descriptor; safety findings apply to the whole payload
    pub fn location(&self) -> String {
        match self.span {
            Some(span) => span.location(),
            None => "document".to_string(),
        }
    }
}

/// Raw PII entity as reported by an entity detector
///
/// Field aliases accept the shapes emitted by common detectors
/// (`type`/`score` as well as `label`/`confidence`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    #[serde(alias = "type", alias = "entity_type")]
    pub label: String,
    #[serde(alias = "score")]
    pub confidence: f64,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub end: Option<usize>,
}

impl RawEntity {
    pub fn new(label: impl Into<String>, confidence: f64, start: usize, end: usize) -> Self {
        Self {
            label: label.into(),
            confidence,
            start: Some(start),
            end: Some(end),
        }
    }
}

/// Raw safety score as reported by a content-safety scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScore {
    #[serde(alias = "dimension")]
    pub label: String,
    #[serde(alias = "confidence")]
    pub score: f64,
}

impl RawScore {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_requires_start_before_end() {
        assert!(Span::new(3, 3).is_none());
        assert!(Span::new(4, 2).is_none());
        let span = Span::new(2, 5).unwrap();
        assert_eq!(span.len(), 3);
        assert_eq!(span.location(), "2-5");
    }

    #[test]
    fn test_span_overlap_is_half_open() {
        let a = Span::new(0, 5).unwrap();
        let b = Span::new(5, 8).unwrap();
        let c = Span::new(4, 6).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn test_finding_constructors_clamp_confidence() {
        let f = Finding::pii("EMAIL_ADDRESS", 1.7, Span::new(0, 4).unwrap());
        assert_eq!(f.confidence, 1.0);
        assert!(f.is_pii());

        let s = Finding::safety("toxicity", -0.2);
        assert_eq!(s.confidence, 0.0);
        assert_eq!(s.location(), "document");
    }

    #[test]
    fn test_raw_entity_accepts_detector_aliases() {
        let raw: RawEntity =
            serde_json::from_str(r#"{"type": "US_SSN", "score": 0.95, "start": 10, "end": 21}"#)
                .unwrap();
        assert_eq!(raw, RawEntity::new("US_SSN", 0.95, 10, 21));

        let score: RawScore =
            serde_json::from_str(r#"{"dimension": "toxicity", "score": 0.4}"#).unwrap();
        assert_eq!(score, RawScore::new("toxicity", 0.4));
    }

    #[test]
    fn test_finding_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&FindingKind::SafetyDimension).unwrap();
        assert_eq!(json, "\"SAFETY_DIMENSION\"");
    }
}
