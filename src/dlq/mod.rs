//! Dead Letter Queue (DLQ) for permanently failed documents.
//!
//! Provides a trait-based abstraction for persisting failed operations for
//! manual review and replay, and a `FailureConsumer` that feeds it.
//!
//! ## Record Format
//!
//! File writers emit one JSON object per line:
//!
//! ```text
//! {"index":"logs","action":"index","document_id":"1","document":"{...}",
//!  "status":400,"error_kind":"validation","message":"failed to parse",
//!  "failed_at":"2024-01-01T00:00:00Z","pipeline":"logs","plugin":"opensearch"}
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let writer = create_writer(&config.dlq);
//! let consumer = DlqFailureConsumer::new(writer, metrics, "logs", "opensearch");
//! let engine = BulkRetryEngine::new(sender, Arc::new(consumer), metrics, config.retry);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::engine::FailureConsumer;
use crate::error::{BulkError, ErrorKind};
use crate::failed::FailedOperation;
use crate::metrics::{MetricSink, DLQ_DOCUMENTS_WRITTEN, DLQ_WRITE_ERRORS};
use crate::operation::BulkAction;

/// Errors that can occur during DLQ operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("DLQ not configured")]
    NotConfigured,

    #[error("Failed to serialize dead letter: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write to DLQ: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),
}

/// Dead letter entry for one failed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub index: String,
    pub action: BulkAction,
    pub document_id: Option<String>,
    /// Serialized document as it was sent.
    pub document: Option<String>,
    pub routing: Option<String>,
    /// Item or request status, when one exists.
    pub status: Option<u16>,
    pub error_kind: ErrorKind,
    /// Human-readable reason for the failure.
    pub message: String,
    pub failed_at: DateTime<Utc>,
    /// Pipeline the document came from.
    pub pipeline: String,
    /// Sink plugin that gave up on it.
    pub plugin: String,
}

impl DeadLetter {
    /// Build a dead letter for `failed`.
    ///
    /// The message is the operation's own cause chain, so an item rejected
    /// early keeps its rejection reason even if the batch later ended on a
    /// request-level error.
    pub fn from_failed(failed: &FailedOperation, pipeline: &str, plugin: &str) -> Self {
        let operation = failed.operation().operation();
        let cause = failed.cause();

        Self {
            index: operation.index.clone(),
            action: operation.action,
            document_id: operation.id.clone(),
            document: operation.document.clone(),
            routing: operation.routing.clone(),
            status: cause.status,
            error_kind: cause.kind,
            message: cause.to_string(),
            failed_at: Utc::now(),
            pipeline: pipeline.to_string(),
            plugin: plugin.to_string(),
        }
    }

    /// One JSON line, without the trailing newline.
    pub fn to_json_line(&self) -> Result<String, DlqError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Trait for persisting dead letters.
///
/// Implementations handle the actual destination (file, channel, etc.).
#[async_trait]
pub trait DeadLetterWriter: Send + Sync {
    /// Persist a batch of dead letters.
    ///
    /// Returns Ok(()) only if every letter was written.
    async fn write(&self, dead_letters: &[DeadLetter]) -> Result<(), DlqError>;

    /// Check if the writer is configured and ready.
    fn is_configured(&self) -> bool {
        true
    }
}

/// No-op DLQ writer that logs but doesn't persist anything.
///
/// Used when DLQ is not configured.
pub struct NoopDeadLetterWriter;

#[async_trait]
impl DeadLetterWriter for NoopDeadLetterWriter {
    async fn write(&self, dead_letters: &[DeadLetter]) -> Result<(), DlqError> {
        for letter in dead_letters {
            warn!(
                index = %letter.index,
                id = letter.document_id.as_deref(),
                error_kind = letter.error_kind.as_str(),
                message = %letter.message,
                "DLQ not configured, dropping failed document. Configure a DLQ to keep failed documents"
            );
        }
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// File DLQ writer appending JSON lines.
///
/// The file is created on first write if missing.
pub struct FileDeadLetterWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDeadLetterWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterWriter for FileDeadLetterWriter {
    async fn write(&self, dead_letters: &[DeadLetter]) -> Result<(), DlqError> {
        if dead_letters.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for letter in dead_letters {
            buffer.push_str(&letter.to_json_line()?);
            buffer.push('\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;

        debug!(
            path = %self.path.display(),
            count = dead_letters.len(),
            "Wrote dead letters"
        );
        Ok(())
    }
}

/// In-memory DLQ writer using a channel.
///
/// Used for standalone mode and testing.
pub struct ChannelDeadLetterWriter {
    sender: mpsc::UnboundedSender<DeadLetter>,
}

impl ChannelDeadLetterWriter {
    /// Create a new channel-based DLQ writer.
    ///
    /// Returns the writer and a receiver for consuming dead letters.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetter>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterWriter for ChannelDeadLetterWriter {
    async fn write(&self, dead_letters: &[DeadLetter]) -> Result<(), DlqError> {
        info!(count = dead_letters.len(), "Publishing to channel DLQ");
        for letter in dead_letters {
            self.sender
                .send(letter.clone())
                .map_err(|e| DlqError::PublishFailed(e.to_string()))?;
        }
        Ok(())
    }
}

/// Configuration for DLQ writers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// JSON-lines file to append dead letters to.
    pub path: Option<PathBuf>,
}

impl DlqConfig {
    /// Check if any DLQ backend is configured.
    pub fn is_configured(&self) -> bool {
        self.path.is_some()
    }
}

/// Create a DLQ writer based on configuration.
///
/// Returns NoopDeadLetterWriter if nothing is configured.
pub fn create_writer(config: &DlqConfig) -> Arc<dyn DeadLetterWriter> {
    match &config.path {
        Some(path) => {
            info!(path = %path.display(), "Using file DLQ");
            Arc::new(FileDeadLetterWriter::new(path.clone()))
        }
        None => {
            debug!("No DLQ configured, using noop writer");
            Arc::new(NoopDeadLetterWriter)
        }
    }
}

/// Failure consumer that converts failures to dead letters.
///
/// Handles were released by the engine before this sees them; this only
/// persists and counts.
pub struct DlqFailureConsumer {
    writer: Arc<dyn DeadLetterWriter>,
    metrics: Arc<dyn MetricSink>,
    pipeline: String,
    plugin: String,
}

impl DlqFailureConsumer {
    pub fn new(
        writer: Arc<dyn DeadLetterWriter>,
        metrics: Arc<dyn MetricSink>,
        pipeline: impl Into<String>,
        plugin: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            metrics,
            pipeline: pipeline.into(),
            plugin: plugin.into(),
        }
    }
}

#[async_trait]
impl FailureConsumer for DlqFailureConsumer {
    async fn consume(&self, failures: Vec<FailedOperation>, cause: Option<&BulkError>) {
        let dead_letters: Vec<DeadLetter> = failures
            .iter()
            .map(|f| DeadLetter::from_failed(f, &self.pipeline, &self.plugin))
            .collect();
        let count = dead_letters.len() as u64;

        if let Some(e) = cause {
            warn!(error = %e, count, "Bulk request ended on error, writing dead letters");
        }

        match self.writer.write(&dead_letters).await {
            Ok(()) => {
                if self.writer.is_configured() {
                    self.metrics.increment(DLQ_DOCUMENTS_WRITTEN, count);
                }
            }
            Err(e) => {
                error!(error = %e, count, "Failed to write dead letters");
                self.metrics.increment(DLQ_WRITE_ERRORS, count);
            }
        }
    }
}
