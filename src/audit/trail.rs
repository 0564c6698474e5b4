//! Asynchronous audit trail
//!
//! The decision path hands finished records to a `tokio::broadcast`
//! channel and returns immediately. Each sink runs in its own task,
//! retries failed writes and logs what it could not store. Nothing a sink
//! does can reach back into an already returned decision.

use super::record::AuditRecord;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Destination for audit records (file, database, SIEM forwarder, ...)
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Store one record.
    async fn write(&self, record: &AuditRecord) -> Result<()>;
}

/// Retry schedule applied by the sink runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Fire-and-forget handoff from the decision path to the audit sinks
#[derive(Debug, Clone)]
pub struct AuditTrail {
    tx: broadcast::Sender<Arc<AuditRecord>>,
}

impl AuditTrail {
    /// `capacity` is the broadcast buffer size; a sink that falls further
    /// behind skips records and logs how many.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a record without waiting. Returns the number of sinks that
    /// will see it.
    pub fn publish(&self, record: AuditRecord) -> usize {
        let trace_id = record.trace_id.clone();
        match self.tx.send(Arc::new(record)) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!(trace_id = %trace_id, "No audit sinks subscribed, record dropped");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AuditRecord>> {
        self.tx.subscribe()
    }

    pub fn sink_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Spawn a task draining the trail into `sink`.
    ///
    /// The task exits once every `AuditTrail` clone is dropped and the
    /// buffered records are written.
    pub fn spawn_sink(&self, sink: Arc<dyn AuditSink>, retry: RetryPolicy) -> JoinHandle<()> {
        let rx = self.subscribe();
        tokio::spawn(run_sink(rx, sink, retry))
    }
}

async fn run_sink(
    mut rx: broadcast::Receiver<Arc<AuditRecord>>,
    sink: Arc<dyn AuditSink>,
    retry: RetryPolicy,
) {
    loop {
        match rx.recv().await {
            Ok(record) => write_with_retry(sink.as_ref(), &record, retry).await,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(sink = sink.name(), skipped = n, "Audit sink lagged, skipped records");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!(sink = sink.name(), "Audit trail closed, sink stopped");
}

async fn write_with_retry(sink: &dyn AuditSink, record: &AuditRecord, retry: RetryPolicy) {
    let attempts = retry.max_attempts.max(1);
    for attempt in 1..=attempts {
        match sink.write(record).await {
            Ok(()) => return,
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    sink = sink.name(),
                    trace_id = %record.trace_id,
                    attempt,
                    error = %e,
                    "Audit write failed, retrying"
                );
                tokio::time::sleep(retry.delay(attempt)).await;
            }
            Err(e) => {
                tracing::error!(
                    sink = sink.name(),
                    trace_id = %record.trace_id,
                    attempts,
                    error = %e,
                    "Audit write failed, giving up"
                );
            }
        }
    }
}
