//! Span masking
//!
//! Findings carry character offsets into the original text. The redactor
//! picks a non-overlapping subset, converts it to byte offsets once and then
//! builds the masked text in a single left-to-right pass over the original,
//! so no replacement ever shifts the offsets of another.

use crate::error::{Error, Result};
use crate::finding::{Finding, Span};
use serde::{Deserialize, Serialize};

/// An overlapping span that lost to a higher-confidence one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionConflict {
    pub kept_label: String,
    pub kept_span: Span,
    pub dropped_label: String,
    pub dropped_span: Span,
    pub dropped_confidence: f64,
}

/// Masked text together with the spans that were actually replaced
#[derive(Debug, Clone, PartialEq)]
pub struct Redaction {
    pub text: String,
    /// Surviving spans in text order
    pub applied: Vec<Finding>,
    pub conflicts: Vec<RedactionConflict>,
}

/// Replaces PII spans by per-label placeholders such as `[EMAIL_ADDRESS]`
#[derive(Debug, Clone, Copy, Default)]
pub struct Redactor;

impl Redactor {
    pub fn new() -> Self {
        Self
    }

    /// Placeholder token for a label
    pub fn placeholder(label: &str) -> String {
        format!("[{}]", label)
    }

    /// Mask `findings` in `text`.
    ///
    /// Errors only when a finding has no span or its span does not fit
    /// `text`; the caller must then fail closed.
    pub fn redact(&self, text: &str, findings: &[Finding]) -> Result<Redaction> {
        let char_len = text.chars().count();

        let mut candidates: Vec<(Span, &Finding)> = Vec::with_capacity(findings.len());
        for finding in findings {
            let span = finding.span.ok_or_else(|| {
                Error::Redaction(format!("finding {} has no span", finding.label))
            })?;
            if span.end > char_len {
                return Err(Error::Redaction(format!(
                    "span {} of {} exceeds text length {}",
                    span, finding.label, char_len
                )));
            }
            candidates.push((span, finding));
        }

        // Highest confidence claims its span first; ties go to the earlier span.
        candidates.sort_by(|(sa, fa), (sb, fb)| {
            fb.confidence
                .total_cmp(&fa.confidence)
                .then_with(|| sa.start.cmp(&sb.start))
                .then_with(|| fa.label.cmp(&fb.label))
                .then_with(|| sa.end.cmp(&sb.end))
        });

        let mut survivors: Vec<(Span, &Finding)> = Vec::with_capacity(candidates.len());
        let mut conflicts = Vec::new();
        for (span, finding) in candidates {
            match survivors.iter().find(|(kept, _)| kept.overlaps(&span)) {
                Some(&(kept_span, kept)) => {
                    let conflict = RedactionConflict {
                        kept_label: kept.label.clone(),
                        kept_span,
                        dropped_label: finding.label.clone(),
                        dropped_span: span,
                        dropped_confidence: finding.confidence,
                    };
                    tracing::warn!(
                        kept = %conflict.kept_label,
                        kept_span = %conflict.kept_span,
                        dropped = %conflict.dropped_label,
                        dropped_span = %conflict.dropped_span,
                        "Redaction conflict: overlapping spans"
                    );
                    conflicts.push(conflict);
                }
                None => survivors.push((span, finding)),
            }
        }
        survivors.sort_by_key(|(span, _)| span.start);

        // Byte offset of every character boundary, including the end of text.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(text.len()))
            .collect();

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0usize;
        for (span, finding) in &survivors {
            let start = boundaries[span.start];
            let end = boundaries[span.end];
            out.push_str(&text[cursor..start]);
            out.push_str(&Self::placeholder(&finding.label));
            cursor = end;
        }
        out.push_str(&text[cursor..]);

        Ok(Redaction {
            text: out,
            applied: survivors.into_iter().map(|(_, f)| f.clone()).collect(),
            conflicts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pii(label: &str, confidence: f64, start: usize, end: usize) -> Finding {
        Finding::pii(label, confidence, Span::new(start, end).unwrap())
    }

    #[test]
    fn test_masks_with_label_placeholder() {
        let text = "Email me at john@example.com";
        let out = Redactor::new()
            .redact(text, &[pii("EMAIL_ADDRESS", 0.8, 12, 28)])
            .unwrap();
        assert_eq!(out.text, "Email me at [EMAIL_ADDRESS]");
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn test_overlap_keeps_higher_confidence() {
        let text = "Contact: jane.doe.smith@example.org today";
        let findings = vec![
            pii("PERSON", 0.70, 15, 25),
            pii("EMAIL_ADDRESS", 0.95, 10, 30),
        ];
        let out = Redactor::new().redact(text, &findings).unwrap();

        assert_eq!(out.applied.len(), 1);
        assert_eq!(out.applied[0].label, "EMAIL_ADDRESS");
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].dropped_label, "PERSON");
        assert_eq!(out.conflicts[0].kept_span, Span::new(10, 30).unwrap());

        let expected = format!("{}[EMAIL_ADDRESS]{}", &text[..10], &text[30..]);
        assert_eq!(out.text, expected);
    }

    #[test]
    fn test_later_higher_confidence_span_replaces_earlier() {
        let text = "aaaaaaaaaaaaaaaaaaaa";
        let findings = vec![pii("PERSON", 0.6, 0, 10), pii("US_SSN", 0.9, 5, 15)];
        let out = Redactor::new().redact(text, &findings).unwrap();
        assert_eq!(out.text, "aaaaa[US_SSN]aaaaa");
        assert_eq!(out.conflicts[0].dropped_label, "PERSON");
    }

    #[test]
    fn test_chained_overlaps_keep_span_whose_rival_lost() {
        // A only conflicts with B, and B loses to C, so A must still be masked.
        let text = "aaaaaaaaaabbbbbbbbbbcccccccccc";
        let findings = vec![pii("A", 0.5, 0, 10), pii("B", 0.7, 8, 20), pii("C", 0.9, 15, 30)];
        let out = Redactor::new().redact(text, &findings).unwrap();

        assert_eq!(out.text, "[A]bbbbb[C]");
        let labels: Vec<&str> = out.applied.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "C"]);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].kept_label, "C");
        assert_eq!(out.conflicts[0].dropped_label, "B");
    }

    #[test]
    fn test_equal_confidence_keeps_earlier_span() {
        let text = "abcdefghijklmnop";
        let findings = vec![pii("B", 0.8, 4, 10), pii("A", 0.8, 0, 6)];
        let out = Redactor::new().redact(text, &findings).unwrap();
        assert_eq!(out.text, "[A]ghijklmnop");
    }

    #[test]
    fn test_adjacent_spans_both_masked() {
        let text = "0123456789";
        let findings = vec![pii("X", 0.5, 0, 5), pii("Y", 0.5, 5, 10)];
        let out = Redactor::new().redact(text, &findings).unwrap();
        assert_eq!(out.text, "[X][Y]");
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn test_character_offsets_on_multibyte_text() {
        let text = "Grüße an Jürgen Müller!";
        let findings = vec![pii("PERSON", 0.6, 9, 22)];
        let out = Redactor::new().redact(text, &findings).unwrap();
        assert_eq!(out.text, "Grüße an [PERSON]!");
    }

    #[test]
    fn test_out_of_bounds_span_is_an_error() {
        let err = Redactor::new()
            .redact("short", &[pii("EMAIL_ADDRESS", 0.9, 0, 40)])
            .unwrap_err();
        assert!(matches!(err, Error::Redaction(_)));
    }

    #[test]
    fn test_safety_finding_is_an_error() {
        let err = Redactor::new()
            .redact("text", &[Finding::safety("toxicity", 0.9)])
            .unwrap_err();
        assert!(matches!(err, Error::Redaction(_)));
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let text = "Call John Smith at 555-123-4567 or john@example.com";
        let mut findings = vec![
            pii("PERSON", 0.6, 5, 15),
            pii("PHONE_NUMBER", 0.75, 19, 31),
            pii("EMAIL_ADDRESS", 0.8, 35, 51),
        ];
        let first = Redactor::new().redact(text, &findings).unwrap();
        findings.reverse();
        let second = Redactor::new().redact(text, &findings).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.text,
            "Call [PERSON] at [PHONE_NUMBER] or [EMAIL_ADDRESS]"
        );
    }
}
