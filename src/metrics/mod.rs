//! Metric names and sinks for bulk writes.
//!
//! The engine reports through the `MetricSink` trait so that the backing
//! registry (OpenTelemetry, in-memory for tests) is injected. Metric names
//! are part of the external contract and must not change.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[cfg(feature = "otel")]
mod otel;
#[cfg(feature = "otel")]
pub use otel::OtelMetrics;

// ============================================================================
// Contract metrics
// ============================================================================

/// Documents written successfully on the very first attempt.
pub const DOCUMENTS_SUCCESS_FIRST_ATTEMPT: &str = "documentsSuccessFirstAttempt";
/// Documents eventually written successfully.
pub const DOCUMENTS_SUCCESS: &str = "documentsSuccess";
/// Documents that failed permanently.
pub const DOCUMENT_ERRORS: &str = "documentErrors";
/// Errors returned by the send function.
pub const BULK_REQUEST_ERRORS: &str = "bulkRequestErrors";
/// Time spent in each send.
pub const BULK_REQUEST_LATENCY: &str = "bulkRequestLatency";
/// Estimated size of each request sent.
pub const BULK_REQUEST_SIZE_BYTES: &str = "bulkRequestSizeBytes";

// ============================================================================
// Diagnostic metrics
// ============================================================================

/// Terminal item failures, tagged by status code.
pub const DOCUMENT_STATUSES: &str = "documentStatuses";
/// Executions that ended with at least one permanent failure.
pub const BULK_REQUEST_FAILED: &str = "bulkRequestFailed";
/// Retries scheduled.
pub const BULK_REQUEST_NUMBER_OF_RETRIES: &str = "bulkRequestNumberOfRetries";
pub const BULK_BAD_REQUEST_ERRORS: &str = "bulkBadRequestErrors";
pub const BULK_REQUEST_NOT_ALLOWED_ERRORS: &str = "bulkRequestNotAllowedErrors";
pub const BULK_REQUEST_INVALID_INPUT_ERRORS: &str = "bulkRequestInvalidInputErrors";
pub const BULK_REQUEST_NOT_FOUND_ERRORS: &str = "bulkRequestNotFoundErrors";
pub const BULK_REQUEST_TIMEOUT_ERRORS: &str = "bulkRequestTimeoutErrors";
pub const BULK_REQUEST_SERVER_ERRORS: &str = "bulkRequestServerErrors";
/// Terminal item failures caused by version conflicts.
pub const DOCUMENTS_VERSION_CONFLICT_ERRORS: &str = "documentsVersionConflictErrors";
/// Successful writes the store reports as already applied (`_seq_no` > 0).
pub const DOCUMENTS_DUPLICATES: &str = "documentsDuplicates";
/// Dead letters persisted.
pub const DLQ_DOCUMENTS_WRITTEN: &str = "dlqDocumentsWritten";
/// Dead letters that could not be persisted.
pub const DLQ_WRITE_ERRORS: &str = "dlqWriteErrors";

/// Tag key used by `DOCUMENT_STATUSES`.
pub const STATUS_TAG: &str = "status";

/// Destination for counters, timers and summaries.
///
/// Implementations must tolerate concurrent calls from independent
/// executions.
pub trait MetricSink: Send + Sync {
    fn increment(&self, name: &'static str, by: u64);

    fn increment_tagged(&self, name: &'static str, key: &'static str, value: String, by: u64);

    fn record_duration(&self, name: &'static str, elapsed: Duration);

    fn record_value(&self, name: &'static str, value: f64);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricSink for NoopMetrics {
    fn increment(&self, _name: &'static str, _by: u64) {}

    fn increment_tagged(&self, _name: &'static str, _key: &'static str, _value: String, _by: u64) {}

    fn record_duration(&self, _name: &'static str, _elapsed: Duration) {}

    fn record_value(&self, _name: &'static str, _value: f64) {}
}

/// Sink that keeps every observation in memory.
///
/// Used in standalone mode and tests to read back exact values.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    durations: Mutex<HashMap<&'static str, Vec<Duration>>>,
    values: Mutex<HashMap<&'static str, Vec<f64>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(name).copied().unwrap_or(0)
    }

    /// Current value of a tagged counter.
    pub fn tagged_counter(&self, name: &str, key: &str, value: &str) -> u64 {
        self.counter(&tagged_name(name, key, value))
    }

    /// Every duration recorded under `name`.
    pub fn durations(&self, name: &str) -> Vec<Duration> {
        let durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        durations.get(name).cloned().unwrap_or_default()
    }

    /// Every value recorded under `name`.
    pub fn values(&self, name: &str) -> Vec<f64> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(name).cloned().unwrap_or_default()
    }

    /// True when nothing at all has been recorded.
    pub fn is_empty(&self) -> bool {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
            && self
                .durations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
            && self
                .values
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }
}

impl MetricSink for InMemoryMetrics {
    fn increment(&self, name: &'static str, by: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(name.to_string()).or_insert(0) += by;
    }

    fn increment_tagged(&self, name: &'static str, key: &'static str, value: String, by: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(tagged_name(name, key, &value)).or_insert(0) += by;
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration) {
        let mut durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        durations.entry(name).or_default().push(elapsed);
    }

    fn record_value(&self, name: &'static str, value: f64) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.entry(name).or_default().push(value);
    }
}

fn tagged_name(name: &str, key: &str, value: &str) -> String {
    format!("{}{{{}={}}}", name, key, value)
}
