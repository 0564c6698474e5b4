//! anzen configuration management
//!
//! Configuration is read from HCL (or JSON, auto-detected) once at startup
//! and validated before any policy snapshot is built. Anything malformed is
//! an `Error::Config` and fatal; requests never see a half-valid config.

use crate::audit::{PersistenceConfig, RetryPolicy};
use crate::detect::{PatternRule, SafetyLexicon};
use crate::engine::RiskBands;
use crate::error::{Error, Result};
use crate::policy::{Route, DEFAULT_REJECTION_MESSAGE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "ANZEN_";

/// Main anzen configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnzenConfig {
    /// Route prefix → policy rules
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,

    /// Confidence bands used to derive `risk_level`
    #[serde(default)]
    pub risk_levels: RiskBands,

    /// Audit trail configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Reference pattern detector configuration
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Reference safety scorer configuration
    #[serde(default)]
    pub safety: SafetyLexicon,
}

/// Policy rules for one route prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub block_entities: Vec<String>,
    #[serde(default)]
    pub redact_entities: Vec<String>,
    pub risk_threshold: f64,
    #[serde(default)]
    pub min_confidence: BTreeMap<String, f64>,
    #[serde(default)]
    pub rejection_message: Option<String>,
}

/// Audit trail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Secret key for hashing matched substrings. When unset a random
    /// per-process key is generated.
    pub hash_key: Option<String>,
    /// Base directory for persisted audit files
    pub storage_dir: PathBuf,
    /// Broadcast buffer between the decision path and the sinks
    pub channel_capacity: usize,
    /// Records retained by the in-memory log
    pub memory_capacity: usize,
    /// Write attempts per record before a sink gives up
    pub max_write_attempts: u32,
    /// Delay before the first retry; doubled on each further attempt
    pub retry_backoff_ms: u64,
    /// JSONL persistence
    pub persistence: PersistenceConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            hash_key: None,
            storage_dir: default_storage_dir(),
            channel_capacity: 1024,
            memory_capacity: 10_000,
            max_write_attempts: 3,
            retry_backoff_ms: 100,
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Reference pattern detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Include the built-in entity patterns
    pub builtin_patterns: bool,
    /// Additional custom patterns
    pub patterns: Vec<PatternRule>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            builtin_patterns: true,
            patterns: Vec::new(),
        }
    }
}

impl AuditConfig {
    /// Retry schedule for audit sinks
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_write_attempts,
            backoff: std::time::Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("anzen"))
        .unwrap_or_else(|| PathBuf::from(".anzen"))
}

impl AnzenConfig {
    /// Parse configuration from HCL, or JSON when the content starts with `{`.
    pub fn parse(content: &str) -> Result<Self> {
        let config: AnzenConfig = if content.trim_start().starts_with('{') {
            serde_json::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        } else {
            // Syntax errors surface as `Error::Hcl`, shape errors as `Error::Config`.
            let body: hcl::Body = hcl::from_str(content)?;
            hcl::from_body(body)
                .map_err(|e| Error::Config(format!("Failed to parse HCL config: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Check every invariant the decision pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for (key, policy) in &self.policies {
            let route = Route::parse(key);
            if !seen.insert(route.as_str().to_string()) {
                return Err(Error::Config(format!(
                    "Duplicate policy for route prefix '{}'",
                    route
                )));
            }
            check_unit(&format!("policies.{key}.risk_threshold"), policy.risk_threshold)?;
            for (label, floor) in &policy.min_confidence {
                check_unit(&format!("policies.{key}.min_confidence.{label}"), *floor)?;
            }
            if policy
                .block_entities
                .iter()
                .chain(&policy.redact_entities)
                .any(|l| l.trim().is_empty())
            {
                return Err(Error::Config(format!(
                    "Policy '{}' contains an empty entity label",
                    key
                )));
            }
            if matches!(&policy.rejection_message, Some(m) if m.trim().is_empty()) {
                return Err(Error::Config(format!(
                    "Policy '{}' has an empty rejection message",
                    key
                )));
            }
        }

        self.risk_levels.validate()?;

        if self.audit.channel_capacity == 0 {
            return Err(Error::Config("audit.channel_capacity must be > 0".into()));
        }
        if self.audit.max_write_attempts == 0 {
            return Err(Error::Config("audit.max_write_attempts must be > 0".into()));
        }
        if matches!(&self.audit.hash_key, Some(k) if k.len() < 16) {
            return Err(Error::Config(
                "audit.hash_key must be at least 16 bytes".into(),
            ));
        }

        for rule in &self.detector.patterns {
            check_unit(&format!("detector.patterns.{}.confidence", rule.label), rule.confidence)?;
            regex::Regex::new(&rule.pattern).map_err(|e| {
                Error::Config(format!("Invalid pattern for {}: {}", rule.label, e))
            })?;
        }
        check_unit("safety.weight_per_hit", self.safety.weight_per_hit)?;
        Ok(())
    }

    /// Apply `ANZEN_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("AUDIT_HASH_KEY") {
            self.audit.hash_key = Some(key);
        }
        if let Some(dir) = lookup("AUDIT_DIR") {
            self.audit.storage_dir = PathBuf::from(dir);
        }
        if let Some(enabled) = lookup("AUDIT_PERSIST") {
            self.audit.persistence.enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
    }

    /// Resolved rejection message for a policy entry
    pub fn rejection_message(policy: &PolicyConfig) -> String {
        policy
            .rejection_message
            .clone()
            .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string())
    }
}

fn check_unit(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be within [0, 1], got {}",
            field, value
        )))
    }
}

/// Load configuration using the standard priority chain.
///
/// Priority: explicit path > `./anzen.hcl` > `<config_dir>/anzen/config.hcl`
/// > default. Environment overrides are applied last and the result is
/// re-validated.
pub fn load_config(explicit_path: Option<&Path>) -> Result<(AnzenConfig, Option<PathBuf>)> {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let local = PathBuf::from("anzen.hcl");
            if local.exists() {
                Some(local)
            } else {
                dirs::config_dir()
                    .map(|d| d.join("anzen/config.hcl"))
                    .filter(|p| p.exists())
            }
        }
    };

    let mut config = match &path {
        Some(path) => {
            tracing::info!("Loading config from {}", path.display());
            AnzenConfig::from_file(path)?
        }
        None => {
            tracing::info!("No config found, using defaults");
            AnzenConfig::default()
        }
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok((config, path))
}
