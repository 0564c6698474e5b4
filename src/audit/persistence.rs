//! JSONL-based audit record persistence with file rotation.
//!
//! Appends records to `audit.jsonl`, one JSON object per line. When the
//! file exceeds `max_file_bytes` it is renamed with a timestamp suffix and
//! a fresh file is started. Rotated files are pruned by age and count.

use super::record::{AuditAction, AuditRecord};
use super::trail::AuditSink;
use crate::engine::Action;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const ACTIVE_FILE: &str = "audit.jsonl";
const ROTATED_PREFIX: &str = "audit-";

/// Configuration for audit persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Subdirectory under the audit storage dir (default: `"audit"`).
    pub dir: String,
    /// Maximum size of the active JSONL file before rotation (bytes).
    pub max_file_bytes: u64,
    /// Maximum number of rotated files to keep.
    pub max_rotated_files: usize,
    /// Rotated files older than this are deleted; 0 disables age-based retention.
    pub retention_days: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "audit".to_string(),
            max_file_bytes: 10 * 1024 * 1024, // 10 MB
            max_rotated_files: 5,
            retention_days: 90,
        }
    }
}

/// Append-only JSONL audit persistence.
#[derive(Debug)]
pub struct AuditPersistence {
    dir: PathBuf,
    active_path: PathBuf,
    config: PersistenceConfig,
}

impl AuditPersistence {
    /// Create a new persistence instance, ensuring the directory exists.
    pub async fn new(base_dir: &Path, config: PersistenceConfig) -> Result<Self> {
        let dir = base_dir.join(&config.dir);
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::Config(format!(
                "Failed to create audit directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        let active_path = dir.join(ACTIVE_FILE);
        Ok(Self {
            dir,
            active_path,
            config,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a single record to the active JSONL file.
    pub async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.maybe_rotate().await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.active_path)
            .await
            .map_err(|e| {
                write_error(format!(
                    "failed to open {}: {}",
                    self.active_path.display(),
                    e
                ))
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| write_error(format!("failed to write record: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| write_error(format!("failed to flush record: {}", e)))?;
        Ok(())
    }

    /// Load all records from the active file.
    pub async fn load_all(&self) -> Vec<AuditRecord> {
        load_from_file(&self.active_path).await
    }

    /// Load the most recent `limit` records from the active file.
    pub async fn load_recent(&self, limit: usize) -> Vec<AuditRecord> {
        let all = self.load_all().await;
        if all.len() <= limit {
            all
        } else {
            all[all.len() - limit..].to_vec()
        }
    }

    /// Query records across active and rotated files.
    ///
    /// With `limit` set, the most recent matching records are returned.
    pub async fn query(&self, filter: &AuditQueryFilter) -> Vec<AuditRecord> {
        let mut matching: Vec<AuditRecord> = self
            .export_all()
            .await
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        if let Some(limit) = filter.limit {
            if matching.len() > limit {
                matching.drain(..matching.len() - limit);
            }
        }
        matching
    }

    /// Export all records (rotated oldest first, then active).
    pub async fn export_all(&self) -> Vec<AuditRecord> {
        let mut all = Vec::new();
        if let Ok(rotated) = self.rotated_files().await {
            for path in rotated {
                all.extend(load_from_file(&path).await);
            }
        }
        all.extend(load_from_file(&self.active_path).await);
        all
    }

    async fn rotated_files(&self) -> Result<Vec<PathBuf>> {
        let mut rotated = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(ROTATED_PREFIX) && name.ends_with(".jsonl") {
                rotated.push(entry.path());
            }
        }
        rotated.sort();
        Ok(rotated)
    }

    /// Rotate the active file if it exceeds `max_file_bytes`.
    async fn maybe_rotate(&self) -> Result<()> {
        let meta = match fs::metadata(&self.active_path).await {
            Ok(m) => m,
            Err(_) => return Ok(()), // not created yet
        };
        if meta.len() < self.config.max_file_bytes {
            return Ok(());
        }

        let ts = Utc::now().format("%Y%m%dT%H%M%S%.6f").to_string();
        let mut rotated = self.dir.join(format!("{ROTATED_PREFIX}{ts}.jsonl"));
        let mut counter = 1u32;
        while rotated.exists() {
            rotated = self.dir.join(format!("{ROTATED_PREFIX}{ts}-{counter}.jsonl"));
            counter += 1;
        }
        fs::rename(&self.active_path, &rotated)
            .await
            .map_err(|e| write_error(format!("failed to rotate audit file: {}", e)))?;
        tracing::debug!(rotated = %rotated.display(), "Rotated audit file");

        self.prune_rotated().await
    }

    /// Apply age and count retention to rotated files.
    async fn prune_rotated(&self) -> Result<()> {
        let mut rotated = self.rotated_files().await?;

        if self.config.retention_days > 0 {
            let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days as i64);
            let mut kept = Vec::with_capacity(rotated.len());
            for path in rotated {
                match file_modified_time(&path) {
                    Some(mtime) if mtime < cutoff => {
                        let _ = fs::remove_file(&path).await;
                        tracing::debug!("Pruned expired audit file: {}", path.display());
                    }
                    _ => kept.push(path),
                }
            }
            rotated = kept;
        }

        while rotated.len() > self.config.max_rotated_files {
            let oldest = rotated.remove(0);
            let _ = fs::remove_file(&oldest).await;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditSink for AuditPersistence {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn write(&self, record: &AuditRecord) -> Result<()> {
        self.append(record).await
    }
}

fn write_error(reason: String) -> Error {
    Error::AuditWrite {
        sink: "jsonl".to_string(),
        reason,
    }
}

/// Read records from a single JSONL file, skipping unparsable lines.
async fn load_from_file(path: &Path) -> Vec<AuditRecord> {
    let file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::debug!(error = %e, "Skipping unparsable audit line"),
        }
    }
    records
}

fn file_modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    Some(DateTime::from(modified))
}

/// Filter for querying audit records.
#[derive(Debug, Default, Clone)]
pub struct AuditQueryFilter {
    pub trace_id: Option<String>,
    /// Exact route, or a prefix when it ends with `*` (e.g. `public:*`)
    pub route: Option<String>,
    pub action: Option<AuditAction>,
    pub decision: Option<Action>,
    /// Inclusive lower time bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper time bound
    pub to: Option<DateTime<Utc>>,
    /// Maximum results to return
    pub limit: Option<usize>,
}

impl AuditQueryFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(ref trace_id) = self.trace_id {
            if record.trace_id.as_str() != trace_id {
                return false;
            }
        }
        if let Some(ref route) = self.route {
            if !route_matches(route, &record.route) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if record.action != action {
                return false;
            }
        }
        if let Some(decision) = self.decision {
            if record.decision != decision {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if record.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Route filter semantics: trailing `*` means prefix match, otherwise exact.
pub fn route_matches(filter: &str, route: &str) -> bool {
    match filter.strip_suffix('*') {
        Some(prefix) => route.starts_with(prefix),
        None => route == filter,
    }
}
