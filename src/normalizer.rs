//! Entity & score normalizer
//!
//! Converts the two detector outputs into one ordered `Vec<Finding>`.
//! Detectors are not trusted to respect the finding contract, so every
//! entry is checked here: finite out-of-range confidences are clamped,
//! anything else that cannot be repaired is dropped. Both outcomes are
//! counted and logged, never fatal.

use crate::error::Error;
use crate::finding::{Finding, RawEntity, RawScore, Span};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the normalizer's diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizerStats {
    /// Entries discarded because they could not be repaired
    pub dropped: u64,
    /// Entries kept after clamping confidence into `[0, 1]`
    pub clamped: u64,
}

/// Result of normalizing one request's detector outputs
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub findings: Vec<Finding>,
    /// Entries dropped from this request
    pub dropped: usize,
}

/// Entity & score normalizer
///
/// Stateless apart from process-wide diagnostic counters, so one instance
/// is shared across all requests.
#[derive(Debug, Default)]
pub struct Normalizer {
    dropped: AtomicU64,
    clamped: AtomicU64,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize PII and safety detector outputs for `text`.
    ///
    /// PII findings come first ordered by `(start, label)`, followed by
    /// safety findings ordered by label.
    pub fn normalize(
        &self,
        text: &str,
        pii_results: &[RawEntity],
        safety_results: &[RawScore],
    ) -> Normalized {
        let text_len = text.chars().count();
        let mut dropped = 0usize;

        let mut pii: Vec<Finding> = pii_results
            .iter()
            .filter_map(|raw| match self.normalize_entity(raw, text_len) {
                Ok(finding) => Some(finding),
                Err(e) => {
                    dropped += 1;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(error = %e, label = %raw.label, "Dropped PII finding");
                    None
                }
            })
            .collect();

        let mut safety: Vec<Finding> = safety_results
            .iter()
            .filter_map(|raw| match self.normalize_score(raw) {
                Ok(finding) => Some(finding),
                Err(e) => {
                    dropped += 1;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(error = %e, label = %raw.label, "Dropped safety finding");
                    None
                }
            })
            .collect();

        pii.sort_by(|a, b| {
            let start = |f: &Finding| f.span.map(|s| s.start);
            start(a)
                .cmp(&start(b))
                .then_with(|| a.label.cmp(&b.label))
                .then_with(|| a.span.cmp(&b.span))
        });
        safety.sort_by(|a, b| a.label.cmp(&b.label));
        pii.extend(safety);

        Normalized {
            findings: pii,
            dropped,
        }
    }

    /// Current diagnostic counters
    pub fn stats(&self) -> NormalizerStats {
        NormalizerStats {
            dropped: self.dropped.load(Ordering::Relaxed),
            clamped: self.clamped.load(Ordering::Relaxed),
        }
    }

    fn normalize_entity(&self, raw: &RawEntity, text_len: usize) -> Result<Finding, Error> {
        let label = raw.label.trim();
        if label.is_empty() {
            return Err(input_error("pii", "empty entity label"));
        }
        let confidence = self.checked_confidence("pii", label, raw.confidence)?;

        let (start, end) = match (raw.start, raw.end) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(input_error("pii", "entity without span")),
        };
        if end > text_len {
            return Err(input_error(
                "pii",
                format!("span [{start}, {end}) exceeds text length {text_len}"),
            ));
        }
        let span = Span::new(start, end)
            .ok_or_else(|| input_error("pii", format!("empty or inverted span [{start}, {end})")))?;

        Ok(Finding::pii(label, confidence, span))
    }

    fn normalize_score(&self, raw: &RawScore) -> Result<Finding, Error> {
        let label = raw.label.trim();
        if label.is_empty() {
            return Err(input_error("safety", "empty safety dimension"));
        }
        let confidence = self.checked_confidence("safety", label, raw.score)?;
        Ok(Finding::safety(label, confidence))
    }

    fn checked_confidence(&self, source: &str, label: &str, value: f64) -> Result<f64, Error> {
        if !value.is_finite() {
            return Err(input_error(source, format!("non-finite confidence for {label}")));
        }
        if !(0.0..=1.0).contains(&value) {
            self.clamped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                source,
                label,
                confidence = value,
                "Clamped out-of-range detector confidence"
            );
            return Ok(value.clamp(0.0, 1.0));
        }
        Ok(value)
    }
}

fn input_error(source: &str, reason: impl Into<String>) -> Error {
    Error::DetectorInput {
        source_name: source.to_string(),
        reason: reason.into(),
    }
}
