//! Policy hot reload
//!
//! Watches the configuration file and publishes a new policy snapshot when
//! it changes. A file that fails to parse or validate is logged and the
//! previous snapshot stays in force.

use crate::config::AnzenConfig;
use crate::error::{Error, Result};
use crate::policy::PolicyResolver;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEBOUNCE_MS: u64 = 300;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Re-read `path` and reload `resolver` from it.
///
/// Returns the new snapshot version.
pub fn reload_from(path: &Path, resolver: &PolicyResolver) -> Result<u64> {
    let mut config = AnzenConfig::from_file(path)?;
    config.apply_env_overrides();
    resolver.reload(&config)
}

/// Running file watcher; stops when dropped.
pub struct ConfigWatcher {
    path: PathBuf,
    stop_tx: std_mpsc::SyncSender<()>,
}

impl ConfigWatcher {
    /// Watch `path` and reload `resolver` once a burst of changes has
    /// settled for the debounce interval.
    pub fn spawn(path: impl Into<PathBuf>, resolver: Arc<PolicyResolver>) -> Result<Self> {
        let path: PathBuf = path.into();
        // Watch the parent directory: editors often replace the file instead of writing it.
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| Error::Config(format!("Not a file path: {}", path.display())))?;

        let (raw_tx, raw_rx) = std_mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(raw_tx, notify::Config::default())
            .map_err(|e| Error::Config(format!("Failed to start config watcher: {}", e)))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Config(format!("Cannot watch {}: {}", dir.display(), e)))?;

        let (stop_tx, stop_rx) = std_mpsc::sync_channel::<()>(1);
        let target = path.clone();
        std::thread::spawn(move || {
            // Keep the watcher alive for the lifetime of the thread.
            let _watcher = watcher;
            // Pushed back by every relevant event; reload once it passes.
            let mut deadline: Option<Instant> = None;

            loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }

                let wait = deadline
                    .map(|d| d.saturating_duration_since(Instant::now()))
                    .unwrap_or(POLL_INTERVAL)
                    .min(POLL_INTERVAL);
                match raw_rx.recv_timeout(wait) {
                    Ok(Ok(event)) => {
                        let relevant = event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()));
                        if relevant && (event.kind.is_modify() || event.kind.is_create()) {
                            deadline = Some(Instant::now() + Duration::from_millis(DEBOUNCE_MS));
                        }
                    }
                    Ok(Err(e)) => tracing::warn!("Config watch error: {e}"),
                    Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                }

                if deadline.is_some_and(|d| Instant::now() >= d) {
                    deadline = None;
                    match reload_from(&target, &resolver) {
                        Ok(version) => tracing::info!(
                            path = %target.display(),
                            version,
                            "Configuration reloaded"
                        ),
                        Err(e) => tracing::warn!(
                            path = %target.display(),
                            error = %e,
                            "Configuration reload rejected, keeping previous policies"
                        ),
                    }
                }
            }
            tracing::debug!(path = %target.display(), "Config watcher stopped");
        });

        tracing::info!(path = %path.display(), "Watching configuration for changes");
        Ok(Self { path, stop_tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
    }
}
