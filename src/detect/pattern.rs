//! Regex-based entity detector

use super::EntityDetector;
use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::finding::RawEntity;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One detection rule: every match of `pattern` is reported as `label`
/// with a fixed `confidence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub label: String,
    pub pattern: String,
    pub confidence: f64,
}

impl PatternRule {
    pub fn new(label: &str, pattern: &str, confidence: f64) -> Self {
        Self {
            label: label.to_string(),
            pattern: pattern.to_string(),
            confidence,
        }
    }
}

/// Built-in rules for the common entity types
pub fn builtin_rules() -> Vec<PatternRule> {
    vec![
        PatternRule::new(
            "EMAIL_ADDRESS",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b",
            0.80,
        ),
        PatternRule::new(
            "PHONE_NUMBER",
            r"(\+?1[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})",
            0.75,
        ),
        PatternRule::new("US_SSN", r"\b\d{3}-?\d{2}-?\d{4}\b", 0.95),
        PatternRule::new("CREDIT_CARD", r"\b(?:\d{4}[-\s]?){3}\d{4}\b", 0.95),
        PatternRule::new(
            "IBAN_CODE",
            r"\b[A-Z]{2}\d{2}[A-Z0-9]{4}\d{7}([A-Z0-9]?){0,16}\b",
            0.85,
        ),
        PatternRule::new("US_PASSPORT", r"\b[A-Z]\d{8}\b", 0.90),
        PatternRule::new("IP_ADDRESS", r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b", 0.70),
        PatternRule::new("PERSON", r"\b[A-Z][a-z]+ [A-Z][a-z]+\b", 0.60),
    ]
}

struct CompiledRule {
    label: String,
    regex: Regex,
    confidence: f64,
}

/// Entity detector driven by regex rules
pub struct PatternDetector {
    rules: Vec<CompiledRule>,
}

impl std::fmt::Debug for PatternDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternDetector")
            .field("rules", &self.labels())
            .finish()
    }
}

impl PatternDetector {
    pub fn new(rules: &[PatternRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    Error::Config(format!("Invalid pattern for {}: {}", rule.label, e))
                })?;
                Ok(CompiledRule {
                    label: rule.label.clone(),
                    regex,
                    confidence: rule.confidence,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Detector with only the built-in rules
    pub fn builtin() -> Result<Self> {
        Self::new(&builtin_rules())
    }

    /// Built-in rules (unless disabled) followed by custom rules
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        let mut rules = if config.builtin_patterns {
            builtin_rules()
        } else {
            Vec::new()
        };
        rules.extend(config.patterns.iter().cloned());
        Self::new(&rules)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.label.as_str()).collect()
    }

    /// Synchronous scan returning character-offset entities ordered by start.
    pub fn scan(&self, text: &str) -> Vec<RawEntity> {
        let boundaries: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
        let to_char = |byte: usize| match boundaries.binary_search(&byte) {
            Ok(idx) => idx,
            Err(idx) => idx,
        };

        let mut entities = Vec::new();
        for rule in &self.rules {
            for m in rule.regex.find_iter(text) {
                let (start, end) = (to_char(m.start()), to_char(m.end()));
                if start < end {
                    entities.push(RawEntity::new(rule.label.clone(), rule.confidence, start, end));
                }
            }
        }

        entities.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.label.cmp(&b.label)));
        entities
    }
}

#[async_trait]
impl EntityDetector for PatternDetector {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn detect(&self, text: &str, language: &str) -> Result<Vec<RawEntity>> {
        let entities = self.scan(text);
        tracing::debug!(language, matches = entities.len(), "Pattern detector scan");
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(entities: &[RawEntity]) -> Vec<&str> {
        entities.iter().map(|e| e.label.as_str()).collect()
    }

    #[test]
    fn test_builtin_rules_compile() {
        let detector = PatternDetector::builtin().unwrap();
        assert_eq!(detector.labels().len(), 8);
    }

    #[test]
    fn test_detects_ssn_with_char_span() {
        let detector = PatternDetector::builtin().unwrap();
        let found = detector.scan("My SSN is 123-45-6789");
        let ssn: Vec<&RawEntity> = found.iter().filter(|e| e.label == "US_SSN").collect();
        assert_eq!(ssn.len(), 1);
        assert_eq!((ssn[0].start, ssn[0].end), (Some(10), Some(21)));
        assert_eq!(ssn[0].confidence, 0.95);
    }

    #[test]
    fn test_detects_email() {
        let detector = PatternDetector::builtin().unwrap();
        let found = detector.scan("Email me at john@example.com");
        assert_eq!(labels(&found), vec!["EMAIL_ADDRESS"]);
        assert_eq!((found[0].start, found[0].end), (Some(12), Some(28)));
    }

    #[test]
    fn test_clean_text_has_no_entities() {
        let detector = PatternDetector::builtin().unwrap();
        assert!(detector.scan("What's the weather in Paris?").is_empty());
    }

    #[test]
    fn test_offsets_are_characters_on_multibyte_text() {
        let detector = PatternDetector::builtin().unwrap();
        let found = detector.scan("Grüße: juergen@example.de");
        let email = found.iter().find(|e| e.label == "EMAIL_ADDRESS").unwrap();
        // "Grüße: " is 7 chars but 9 bytes
        assert_eq!(email.start, Some(7));
        assert_eq!(email.end, Some(25));
    }

    #[test]
    fn test_custom_rules_from_config() {
        let config = DetectorConfig {
            builtin_patterns: false,
            patterns: vec![PatternRule::new("EMPLOYEE_ID", r"EMP-\d{6}", 0.9)],
        };
        let detector = PatternDetector::from_config(&config).unwrap();
        let found = detector.scan("Badge EMP-123456 issued");
        assert_eq!(labels(&found), vec!["EMPLOYEE_ID"]);
        assert_eq!((found[0].start, found[0].end), (Some(6), Some(16)));
    }

    #[test]
    fn test_invalid_rule_is_config_error() {
        let err = PatternDetector::new(&[PatternRule::new("BAD", "(", 0.5)]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_detect_trait() {
        let detector = PatternDetector::builtin().unwrap();
        let found = detector.detect("Server 192.168.1.20 is down", "en").await.unwrap();
        assert_eq!(labels(&found), vec!["IP_ADDRESS"]);
    }
}
