//! Detector contracts
//!
//! Entity detection and content-safety scoring are external collaborators.
//! The gateway only depends on these two traits; `pattern` and `lexicon`
//! are small reference implementations usable without a model server.

pub mod lexicon;
pub mod pattern;

pub use lexicon::{LexiconScorer, SafetyLexicon};
pub use pattern::{PatternDetector, PatternRule};

use crate::error::Result;
use crate::finding::{RawEntity, RawScore};
use async_trait::async_trait;

/// Structured PII detection
#[async_trait]
pub trait EntityDetector: Send + Sync {
    /// Name used in logs and detector failures
    fn name(&self) -> &str;

    /// Detect entities; spans are character offsets into `text`.
    async fn detect(&self, text: &str, language: &str) -> Result<Vec<RawEntity>>;
}

/// Probabilistic content-safety scoring
#[async_trait]
pub trait SafetyScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Score `text` along named safety dimensions.
    async fn score(&self, text: &str) -> Result<Vec<RawScore>>;
}
