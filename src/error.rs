//! Error types for anzen-core

use thiserror::Error;

/// Errors that can occur in the decision pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing policy configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Out-of-contract value from an upstream detector.
    ///
    /// Recovered by the normalizer (clamp or drop) and counted; never
    /// returned from a decision.
    #[error("Detector input error from '{source_name}': {reason}")]
    DetectorInput { source_name: String, reason: String },

    /// Detector collaborator failed to produce findings
    #[error("Detector '{detector}' failed: {reason}")]
    Detector { detector: String, reason: String },

    /// Internal redaction failure (the decision fails closed)
    #[error("Redaction error: {0}")]
    Redaction(String),

    /// Audit sink unavailable or rejected a record
    #[error("Audit write failed on sink '{sink}': {reason}")]
    AuditWrite { sink: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HCL parse error
    #[error("HCL error: {0}")]
    Hcl(#[from] hcl::Error),
}

/// Result type alias for anzen-core operations
pub type Result<T> = std::result::Result<T, Error>;
