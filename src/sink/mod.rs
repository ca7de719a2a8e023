//! Batching front end for the retry engine.
//!
//! Accumulates wrappers into a pending request and hands it to the engine
//! when adding the next operation would reach the size limit, or when the
//! flush timeout has passed since the last flush.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::duration_ms;
use crate::engine::{BulkRetryEngine, ExecutionSummary};
use crate::operation::OperationWrapper;
use crate::request::AccumulatingRequest;

/// Batching thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Flush before a request would reach this many bytes. `None` disables
    /// the size limit.
    pub bulk_size_bytes: Option<u64>,
    /// Flush pending operations once this long has passed since the last
    /// flush.
    #[serde(rename = "flush_timeout_ms", with = "duration_ms")]
    pub flush_timeout: Duration,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            bulk_size_bytes: Some(5 * 1024 * 1024),
            flush_timeout: Duration::from_secs(60),
        }
    }
}

struct Pending {
    request: AccumulatingRequest,
    last_flush: Instant,
}

/// Size- and time-triggered batching in front of a `BulkRetryEngine`.
pub struct BulkSink {
    engine: Arc<BulkRetryEngine>,
    config: BulkConfig,
    pending: Mutex<Pending>,
}

impl BulkSink {
    pub fn new(engine: Arc<BulkRetryEngine>, config: BulkConfig) -> Self {
        let request = engine.request_factory().create();
        Self {
            engine,
            config,
            pending: Mutex::new(Pending {
                request,
                last_flush: Instant::now(),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<BulkRetryEngine> {
        &self.engine
    }

    /// Number of operations waiting for the next flush.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.request.count()
    }

    /// Add operations, flushing whenever a threshold is hit.
    ///
    /// Returns the summaries of the flushes this call performed.
    pub async fn output(
        &self,
        wrappers: impl IntoIterator<Item = OperationWrapper> + Send,
    ) -> Vec<ExecutionSummary> {
        let mut pending = self.pending.lock().await;
        let mut summaries = Vec::new();

        for wrapper in wrappers {
            if let Some(limit) = self.config.bulk_size_bytes {
                let estimated = pending.request.estimate_size_with(&wrapper);
                if estimated >= limit && !pending.request.is_empty() {
                    debug!(
                        estimated,
                        limit,
                        operations = pending.request.count(),
                        "Bulk size limit reached, flushing"
                    );
                    summaries.push(self.flush_locked(&mut pending).await);
                }
            }
            pending.request.add(wrapper);
        }

        if !pending.request.is_empty() && pending.last_flush.elapsed() >= self.config.flush_timeout {
            debug!(
                operations = pending.request.count(),
                "Flush timeout elapsed, flushing"
            );
            summaries.push(self.flush_locked(&mut pending).await);
        }

        summaries
    }

    /// Send whatever is pending. Returns `None` if nothing was.
    pub async fn flush(&self) -> Option<ExecutionSummary> {
        let mut pending = self.pending.lock().await;
        if pending.request.is_empty() {
            return None;
        }
        Some(self.flush_locked(&mut pending).await)
    }

    /// Flush leftovers before the sink goes away.
    pub async fn shutdown(&self) -> Option<ExecutionSummary> {
        let summary = self.flush().await;
        info!(
            flushed = summary.map_or(0, |s| s.succeeded + s.failed),
            "Bulk sink shut down"
        );
        summary
    }

    async fn flush_locked(&self, pending: &mut Pending) -> ExecutionSummary {
        let request = std::mem::replace(
            &mut pending.request,
            self.engine.request_factory().create(),
        );
        pending.last_flush = Instant::now();
        self.engine.execute(request).await
    }
}
