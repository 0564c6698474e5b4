//! # anzen-core
//!
//! Policy decisions, redaction and hash-only audit trails for an LLM safety
//! gateway.
//!
//! ## Overview
//!
//! Every payload travelling between a client and an LLM/agent backend is
//! checked against route-scoped rules. Detector outputs are normalized
//! into uniform findings, the most specific policy for the route is
//! resolved, and the payload is allowed unchanged, redacted, or blocked.
//! Each decision produces an audit record that carries hashes, labels and
//! offsets but never the sensitive values themselves.
//!
//! ## Quick Start
//!
//! ```rust
//! use anzen_core::config::AnzenConfig;
//! use anzen_core::finding::RawEntity;
//! use anzen_core::gateway::{AssessRequest, Gateway};
//! use anzen_core::engine::Action;
//!
//! # fn example() -> anzen_core::Result<()> {
//! let config = AnzenConfig::parse(r#"
//! policies = {
//!   "public" = {
//!     block_entities  = ["US_SSN"]
//!     redact_entities = ["EMAIL_ADDRESS"]
//!     risk_threshold  = 0.7
//!   }
//! }
//! "#)?;
//! let gateway = Gateway::from_config(&config)?;
//!
//! let assessment = gateway.assess(AssessRequest {
//!     text: "Email me at john@example.com".into(),
//!     route: "public:chat".into(),
//!     pii_findings: vec![RawEntity::new("EMAIL_ADDRESS", 0.8, 12, 28)],
//!     ..Default::default()
//! });
//! assert_eq!(assessment.decision.action, Action::Redact);
//! assert_eq!(assessment.delivered_text(), "Email me at [EMAIL_ADDRESS]");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Normalizer**: clamps or drops out-of-contract detector output
//! - **PolicyResolver**: most-specific route prefix over an immutable snapshot
//! - **DecisionEngine**: per-finding dispositions, max-aggregated
//! - **Redactor**: single-pass masking with deterministic overlap resolution
//! - **AuditTraceBuilder** / **AuditTrail**: keyed-hash records, async sinks

pub mod audit;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod finding;
pub mod gateway;
pub mod normalizer;
pub mod policy;
pub mod redactor;
pub mod watch;
pub mod wire;

// Re-export core types
pub use audit::{AuditRecord, AuditTrail, TraceId};
pub use config::AnzenConfig;
pub use engine::{Action, Decision, DecisionEngine, ReasonCode, RiskLevel};
pub use error::{Error, Result};
pub use finding::{Finding, FindingKind, RawEntity, RawScore, Span};
pub use gateway::{AssessRequest, Assessment, Direction, Gateway};
pub use normalizer::Normalizer;
pub use policy::{Policy, PolicyResolver, Route};
pub use redactor::Redactor;
