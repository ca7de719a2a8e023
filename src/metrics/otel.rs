//! OTel-native metrics instruments.
//!
//! The six contract instruments are lazily initialized statics. Diagnostic
//! counters are created on first use and cached by name.
//!
//! Names are prefixed with `bulk_retry.`; the OTel Collector / Prometheus
//! exporter converts dots to underscores.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

use super::*;

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("bulk_retry"));

/// Documents written on the first attempt.
pub static SUCCESS_FIRST_ATTEMPT_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("bulk_retry.documentsSuccessFirstAttempt")
        .with_description("Documents written successfully on the first attempt")
        .build()
});

/// Documents eventually written.
pub static SUCCESS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("bulk_retry.documentsSuccess")
        .with_description("Documents written successfully")
        .build()
});

/// Documents failed permanently.
pub static DOCUMENT_ERRORS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("bulk_retry.documentErrors")
        .with_description("Documents that failed permanently")
        .build()
});

/// Send attempts that returned an error.
pub static REQUEST_ERRORS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("bulk_retry.bulkRequestErrors")
        .with_description("Bulk requests that failed as a whole")
        .build()
});

/// Duration of each send.
pub static REQUEST_LATENCY: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("bulk_retry.bulkRequestLatency")
        .with_description("Bulk request duration")
        .with_unit("s")
        .build()
});

/// Estimated size of each send.
pub static REQUEST_SIZE: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("bulk_retry.bulkRequestSizeBytes")
        .with_description("Estimated bulk request size")
        .with_unit("By")
        .build()
});

/// `MetricSink` backed by the global OpenTelemetry meter provider.
#[derive(Default)]
pub struct OtelMetrics {
    counters: Mutex<HashMap<&'static str, Counter<u64>>>,
}

impl OtelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_counter(&self, name: &'static str, f: impl FnOnce(&Counter<u64>)) {
        match name {
            DOCUMENTS_SUCCESS_FIRST_ATTEMPT => f(&SUCCESS_FIRST_ATTEMPT_TOTAL),
            DOCUMENTS_SUCCESS => f(&SUCCESS_TOTAL),
            DOCUMENT_ERRORS => f(&DOCUMENT_ERRORS_TOTAL),
            BULK_REQUEST_ERRORS => f(&REQUEST_ERRORS_TOTAL),
            _ => {
                let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
                let counter = counters.entry(name).or_insert_with(|| {
                    METER
                        .u64_counter(format!("bulk_retry.{}", name))
                        .build()
                });
                f(counter);
            }
        }
    }
}

impl MetricSink for OtelMetrics {
    fn increment(&self, name: &'static str, by: u64) {
        self.with_counter(name, |counter| counter.add(by, &[]));
    }

    fn increment_tagged(&self, name: &'static str, key: &'static str, value: String, by: u64) {
        self.with_counter(name, |counter| counter.add(by, &[KeyValue::new(key, value)]));
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration) {
        match name {
            BULK_REQUEST_LATENCY => REQUEST_LATENCY.record(elapsed.as_secs_f64(), &[]),
            _ => self.record_value(name, elapsed.as_secs_f64()),
        }
    }

    fn record_value(&self, name: &'static str, value: f64) {
        match name {
            BULK_REQUEST_SIZE_BYTES => REQUEST_SIZE.record(value, &[]),
            BULK_REQUEST_LATENCY => REQUEST_LATENCY.record(value, &[]),
            _ => tracing::debug!(metric = name, value, "No histogram registered for metric"),
        }
    }
}

impl std::fmt::Debug for OtelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelMetrics").finish_non_exhaustive()
    }
}
