//! Term-list safety scorer

use super::SafetyScorer;
use crate::error::{Error, Result};
use crate::finding::RawScore;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Safety dimensions and their trigger terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLexicon {
    /// Score contributed by each matched term
    pub weight_per_hit: f64,
    /// Dimension name → terms (matched case-insensitively on word boundaries)
    pub dimensions: BTreeMap<String, Vec<String>>,
}

impl Default for SafetyLexicon {
    fn default() -> Self {
        Self {
            weight_per_hit: 0.5,
            dimensions: BTreeMap::new(),
        }
    }
}

/// Scores each dimension as `min(1, hits × weight_per_hit)`
#[derive(Debug)]
pub struct LexiconScorer {
    weight_per_hit: f64,
    dimensions: Vec<(String, Regex)>,
}

impl LexiconScorer {
    pub fn new(lexicon: &SafetyLexicon) -> Result<Self> {
        let mut dimensions = Vec::new();
        for (dimension, terms) in &lexicon.dimensions {
            let alternatives: Vec<String> = terms
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(regex::escape)
                .collect();
            if alternatives.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
            let regex = Regex::new(&pattern).map_err(|e| {
                Error::Config(format!("Invalid lexicon for {}: {}", dimension, e))
            })?;
            dimensions.push((dimension.clone(), regex));
        }
        Ok(Self {
            weight_per_hit: lexicon.weight_per_hit,
            dimensions,
        })
    }

    /// Scores for dimensions with at least one hit, ordered by dimension
    pub fn evaluate(&self, text: &str) -> Vec<RawScore> {
        self.dimensions
            .iter()
            .filter_map(|(dimension, regex)| {
                let hits = regex.find_iter(text).count();
                (hits > 0).then(|| {
                    RawScore::new(
                        dimension.clone(),
                        (hits as f64 * self.weight_per_hit).min(1.0),
                    )
                })
            })
            .collect()
    }
}

#[async_trait]
impl SafetyScorer for LexiconScorer {
    fn name(&self) -> &str {
        "lexicon"
    }

    async fn score(&self, text: &str) -> Result<Vec<RawScore>> {
        Ok(self.evaluate(text))
    }
}
