//! Retry state machine for one bulk batch.
//!
//! `execute` sends the batch, classifies every item, releases handles for
//! items whose fate is decided, and resends only the transiently failed
//! items (original wrappers, original order) after a backoff delay. It
//! loops until nothing is left to retry or the retry budget is spent, then
//! hands every permanent failure to the failure consumer in a single call.
//!
//! ```text
//! ATTEMPTING ─┬─ all items ok ─────────────────────────► DONE
//!             ├─ some items terminal, none retryable ──► DONE (consumer)
//!             ├─ retryable items / retryable error ────► sleep ─► ATTEMPTING
//!             ├─ non-retryable error ──────────────────► DONE (consumer)
//!             └─ retryable left, budget spent ─────────► DONE (consumer)
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::{BulkError, FailureCause, Result};
use crate::failed::FailedOperation;
use crate::metrics::*;
use crate::operation::OperationWrapper;
use crate::request::{AccumulatingRequest, DefaultRequestFactory, RequestFactory};
use crate::response::{BulkResponse, BulkResponseItem};
use crate::retry::RetryConfig;
use crate::status::{self, categorize_request_status, ItemOutcome, RequestErrorCategory};

/// Retries are logged at `warn` once every this many attempts.
const WARN_EVERY_N_RETRIES: u32 = 5;

/// Submits a bulk request to the store.
///
/// Transport, TLS and authentication are the implementor's concern. An
/// `Err` means the request as a whole failed; per-item failures come back
/// inside the response.
#[async_trait]
pub trait BulkSender: Send + Sync {
    async fn send(&self, request: &AccumulatingRequest) -> Result<BulkResponse>;
}

/// Receives permanently failed operations.
///
/// Called at most once per `execute`, with the complete list. `cause` is the
/// request-level error that ended the batch, or `None` when the failures are
/// per-item rejections.
#[async_trait]
pub trait FailureConsumer: Send + Sync {
    async fn consume(&self, failures: Vec<FailedOperation>, cause: Option<&BulkError>);
}

/// What one `execute` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Number of sends performed.
    pub attempts: u32,
    /// Operations released with `success = true`.
    pub succeeded: usize,
    /// Operations released with `success = false`.
    pub failed: usize,
}

impl ExecutionSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Working state of one `execute` call.
#[derive(Default)]
struct RetryState {
    attempt: u32,
    succeeded: usize,
    failures: Vec<FailedOperation>,
    final_error: Option<BulkError>,
}

/// Result of handling one send.
enum Step {
    Retry {
        request: AccumulatingRequest,
        reason: String,
    },
    Done,
}

/// Bulk-write retry engine.
///
/// Holds no per-batch state; concurrent `execute` calls share only the
/// metric sink.
pub struct BulkRetryEngine {
    sender: Arc<dyn BulkSender>,
    failure_consumer: Arc<dyn FailureConsumer>,
    request_factory: Arc<dyn RequestFactory>,
    metrics: Arc<dyn MetricSink>,
    config: RetryConfig,
}

impl BulkRetryEngine {
    pub fn new(
        sender: Arc<dyn BulkSender>,
        failure_consumer: Arc<dyn FailureConsumer>,
        metrics: Arc<dyn MetricSink>,
        config: RetryConfig,
    ) -> Self {
        Self {
            sender,
            failure_consumer,
            request_factory: Arc::new(DefaultRequestFactory),
            metrics,
            config,
        }
    }

    /// Use a custom factory for retry sub-batches.
    pub fn with_request_factory(mut self, request_factory: Arc<dyn RequestFactory>) -> Self {
        self.request_factory = request_factory;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn request_factory(&self) -> &Arc<dyn RequestFactory> {
        &self.request_factory
    }

    /// True iff at least one item has a retryable status.
    pub fn can_retry(&self, response: &BulkResponse) -> bool {
        status::can_retry(response)
    }

    /// Resolve a batch completely.
    ///
    /// Every handle in `request` is released exactly once before this
    /// returns. Failures are reported through the failure consumer and
    /// metrics, never returned.
    pub async fn execute(&self, request: AccumulatingRequest) -> ExecutionSummary {
        if request.is_empty() {
            debug!("Empty bulk request, nothing to send");
            return ExecutionSummary::default();
        }

        let mut state = RetryState::default();
        let mut current = request;

        loop {
            let step = match self.send(&current).await {
                Ok(response) => self.handle_response(current, response, &mut state),
                Err(e) => self.handle_error(current, e, &mut state),
            };

            match step {
                Step::Retry { request, reason } => {
                    self.backoff(&mut state, request.count(), &reason).await;
                    current = request;
                }
                Step::Done => break,
            }
        }

        self.finish(state).await
    }

    async fn send(&self, request: &AccumulatingRequest) -> Result<BulkResponse> {
        self.metrics
            .record_value(BULK_REQUEST_SIZE_BYTES, request.estimated_size_bytes() as f64);

        let start = Instant::now();
        let result = self.sender.send(request).await;
        self.metrics
            .record_duration(BULK_REQUEST_LATENCY, start.elapsed());

        result
    }

    fn handle_error(
        &self,
        current: AccumulatingRequest,
        error: BulkError,
        state: &mut RetryState,
    ) -> Step {
        self.record_request_error(&error);

        if !error.is_retryable() {
            warn!(
                error = %error,
                operations = current.count(),
                attempt = state.attempt,
                "Bulk request failed with non-retryable error"
            );
            for mut wrapper in current.into_operations() {
                wrapper.release_event_handle(false);
                state
                    .failures
                    .push(FailedOperation::from_error(wrapper, &error));
            }
            state.final_error = Some(error);
            return Step::Done;
        }

        if !self.config.should_retry(state.attempt) {
            let last = FailureCause::from_error(&error);
            let candidates = current
                .into_operations()
                .into_iter()
                .map(|wrapper| (wrapper, last.clone()))
                .collect();
            self.exhaust(candidates, state);
            return Step::Done;
        }

        warn!(
            error = %error,
            operations = current.count(),
            attempt = state.attempt,
            "Bulk request failed, resending"
        );
        Step::Retry {
            reason: error.to_string(),
            request: current,
        }
    }

    fn handle_response(
        &self,
        current: AccumulatingRequest,
        response: BulkResponse,
        state: &mut RetryState,
    ) -> Step {
        let expected = current.count();
        if response.len() != expected {
            let mismatch = BulkError::ResponseMismatch {
                expected,
                actual: response.len(),
            };
            error!(error = %mismatch, "Bulk response does not correlate with request");
            for mut wrapper in current.into_operations() {
                wrapper.release_event_handle(false);
                state
                    .failures
                    .push(FailedOperation::from_error(wrapper, &mismatch));
            }
            state.final_error = Some(mismatch);
            return Step::Done;
        }

        debug!(
            took_ms = response.took_ms,
            items = expected,
            attempt = state.attempt,
            "Bulk response received"
        );

        let mut succeeded = 0usize;
        let mut duplicates = 0u64;
        let mut candidates = Vec::new();

        for (mut wrapper, item) in current.into_operations().into_iter().zip(&response.items) {
            match item.outcome() {
                ItemOutcome::Success => {
                    if item.is_duplicate() {
                        duplicates += 1;
                    }
                    wrapper.release_event_handle(true);
                    succeeded += 1;
                }
                ItemOutcome::Throttled | ItemOutcome::ServerError => {
                    candidates.push((wrapper, FailureCause::from_item(item)));
                }
                ItemOutcome::Validation => {
                    self.record_terminal_item(&wrapper, item);
                    wrapper.release_event_handle(false);
                    state.failures.push(FailedOperation::from_item(wrapper, item));
                }
            }
        }

        self.record_successes(succeeded, state);
        if duplicates > 0 {
            self.metrics.increment(DOCUMENTS_DUPLICATES, duplicates);
        }

        if candidates.is_empty() {
            return Step::Done;
        }

        if !self.config.should_retry(state.attempt) {
            self.exhaust(candidates, state);
            return Step::Done;
        }

        let reason = retry_reason(&candidates);
        let mut request = self.request_factory.create();
        request.extend(candidates.into_iter().map(|(wrapper, _)| wrapper));
        Step::Retry { request, reason }
    }

    /// Fail every outstanding candidate with a budget-exhaustion cause.
    fn exhaust(&self, candidates: Vec<(OperationWrapper, FailureCause)>, state: &mut RetryState) {
        let max_retries = self.config.max_retries_display();
        let last_failure = candidates
            .last()
            .map(|(_, cause)| cause.to_string())
            .unwrap_or_default();

        warn!(
            max_retries,
            operations = candidates.len(),
            last_failure = %last_failure,
            "Retry budget exhausted, failing outstanding operations"
        );

        for (mut wrapper, cause) in candidates {
            wrapper.release_event_handle(false);
            state.failures.push(FailedOperation::new(
                wrapper,
                FailureCause::retry_budget_exhausted(max_retries, cause),
            ));
        }
        state.final_error = Some(BulkError::RetryBudgetExhausted {
            max_retries,
            last_failure,
        });
    }

    async fn backoff(&self, state: &mut RetryState, operations: usize, reason: &str) {
        let delay = self.config.delay_for_attempt(state.attempt);
        state.attempt += 1;
        self.metrics.increment(BULK_REQUEST_NUMBER_OF_RETRIES, 1);

        if state.attempt % WARN_EVERY_N_RETRIES == 0 {
            warn!(
                attempt = state.attempt,
                operations,
                delay_ms = delay.as_millis() as u64,
                reason,
                "Bulk request still failing, retrying"
            );
        } else {
            debug!(
                attempt = state.attempt,
                operations,
                delay_ms = delay.as_millis() as u64,
                "Retrying bulk request"
            );
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn finish(&self, state: RetryState) -> ExecutionSummary {
        let RetryState {
            attempt,
            succeeded,
            failures,
            final_error,
        } = state;
        let failed = failures.len();

        if failed > 0 {
            self.metrics.increment(DOCUMENT_ERRORS, failed as u64);
            self.metrics.increment(BULK_REQUEST_FAILED, 1);
            self.failure_consumer
                .consume(failures, final_error.as_ref())
                .await;
        } else if attempt > 0 {
            info!(attempts = attempt + 1, succeeded, "Bulk request succeeded after retries");
        }

        ExecutionSummary {
            attempts: attempt + 1,
            succeeded,
            failed,
        }
    }

    fn record_successes(&self, succeeded: usize, state: &mut RetryState) {
        if succeeded == 0 {
            return;
        }
        state.succeeded += succeeded;
        self.metrics.increment(DOCUMENTS_SUCCESS, succeeded as u64);
        if state.attempt == 0 {
            self.metrics
                .increment(DOCUMENTS_SUCCESS_FIRST_ATTEMPT, succeeded as u64);
        }
    }

    fn record_terminal_item(&self, wrapper: &OperationWrapper, item: &BulkResponseItem) {
        self.metrics.increment_tagged(
            DOCUMENT_STATUSES,
            STATUS_TAG,
            item.status.to_string(),
            1,
        );

        if status::is_version_conflict(item) {
            self.metrics.increment(DOCUMENTS_VERSION_CONFLICT_ERRORS, 1);
            debug!(
                index = wrapper.index(),
                id = wrapper.id(),
                reason = item.reason(),
                "Document version conflict"
            );
        } else {
            warn!(
                index = wrapper.index(),
                id = wrapper.id(),
                action = %wrapper.operation().action,
                status = item.status,
                error_type = item.error_type(),
                reason = item.reason(),
                "Document failed permanently"
            );
        }
    }

    fn record_request_error(&self, error: &BulkError) {
        self.metrics.increment(BULK_REQUEST_ERRORS, 1);

        if let Some(status) = error.status() {
            let counter = match categorize_request_status(status) {
                RequestErrorCategory::BadRequest => BULK_BAD_REQUEST_ERRORS,
                RequestErrorCategory::NotAllowed => BULK_REQUEST_NOT_ALLOWED_ERRORS,
                RequestErrorCategory::InvalidInput => BULK_REQUEST_INVALID_INPUT_ERRORS,
                RequestErrorCategory::NotFound => BULK_REQUEST_NOT_FOUND_ERRORS,
                RequestErrorCategory::Timeout => BULK_REQUEST_TIMEOUT_ERRORS,
                RequestErrorCategory::Server => BULK_REQUEST_SERVER_ERRORS,
            };
            self.metrics.increment(counter, 1);
        }
    }
}

/// Summarize the failing items of an attempt for the retry log.
fn retry_reason(candidates: &[(OperationWrapper, FailureCause)]) -> String {
    let shown: Vec<String> = candidates
        .iter()
        .take(3)
        .map(|(wrapper, cause)| {
            format!(
                "{} {} [{}]",
                wrapper.operation().action,
                wrapper.index(),
                cause
            )
        })
        .collect();
    if candidates.len() > shown.len() {
        format!("{}, and {} more", shown.join(", "), candidates.len() - shown.len())
    } else {
        shown.join(", ")
    }
}

#[cfg(test)]
mod tests;
