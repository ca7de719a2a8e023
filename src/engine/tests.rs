use super::*;
use crate::error::ErrorKind;
use crate::operation::{BulkAction, BulkOperation};
use crate::response::BulkResponseItem;
use crate::status::VERSION_CONFLICT_EXCEPTION_TYPE;
use crate::test_utils::*;
use std::time::Duration;

struct Harness {
    sender: Arc<ScriptedSender>,
    consumer: Arc<RecordingConsumer>,
    metrics: Arc<InMemoryMetrics>,
    engine: BulkRetryEngine,
}

fn harness(config: RetryConfig) -> Harness {
    let sender = Arc::new(ScriptedSender::new());
    let consumer = Arc::new(RecordingConsumer::new());
    let metrics = Arc::new(InMemoryMetrics::new());
    let engine = BulkRetryEngine::new(sender.clone(), consumer.clone(), metrics.clone(), config);
    Harness {
        sender,
        consumer,
        metrics,
        engine,
    }
}

fn assert_released_once(handles: &[Arc<RecordingHandle>], expected: &[bool]) {
    assert_eq!(handles.len(), expected.len());
    for (i, (handle, success)) in handles.iter().zip(expected).enumerate() {
        assert_eq!(
            handle.released_once(),
            Some(*success),
            "handle {} releases: {:?}",
            i + 1,
            handle.releases()
        );
    }
}

#[tokio::test]
async fn test_all_success_first_attempt() {
    let h = harness(RetryConfig::immediate(Some(3)));
    let (request, handles) = request_of(3);

    let summary = h.engine.execute(request).await;

    assert_eq!(
        summary,
        ExecutionSummary {
            attempts: 1,
            succeeded: 3,
            failed: 0
        }
    );
    assert!(summary.is_success());
    assert_released_once(&handles, &[true, true, true]);
    assert_eq!(h.consumer.call_count().await, 0);
    assert_eq!(h.metrics.counter(DOCUMENTS_SUCCESS), 3);
    assert_eq!(h.metrics.counter(DOCUMENTS_SUCCESS_FIRST_ATTEMPT), 3);
    assert_eq!(h.metrics.counter(DOCUMENT_ERRORS), 0);
    assert_eq!(h.metrics.durations(BULK_REQUEST_LATENCY).len(), 1);
    assert_eq!(h.metrics.values(BULK_REQUEST_SIZE_BYTES).len(), 1);
}

#[tokio::test]
async fn test_size_metric_matches_request_estimate() {
    let h = harness(RetryConfig::immediate(Some(3)));
    let (request, _handles) = request_of(2);
    let expected = request.estimated_size_bytes() as f64;

    h.engine.execute(request).await;

    assert_eq!(h.metrics.values(BULK_REQUEST_SIZE_BYTES), vec![expected]);
}

#[tokio::test]
async fn test_empty_request_is_trivial_success() {
    let h = harness(RetryConfig::default());

    let summary = h.engine.execute(AccumulatingRequest::new()).await;

    assert_eq!(summary, ExecutionSummary::default());
    assert_eq!(h.sender.attempts().await, 0);
    assert_eq!(h.consumer.call_count().await, 0);
    assert!(h.metrics.is_empty());
}

#[tokio::test]
async fn test_terminal_items_fail_without_retry() {
    let h = harness(RetryConfig::immediate(Some(3)));
    h.sender.push_statuses(&[201, 400, 404]).await;
    let (request, handles) = request_of(3);

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.attempts, 1);
    assert_eq!(summary.failed, 2);
    assert_released_once(&handles, &[true, false, false]);

    let calls = h.consumer.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].ids, vec!["2", "3"]);
    assert_eq!(calls[0].kinds, vec![ErrorKind::Validation, ErrorKind::Validation]);
    assert!(calls[0].cause.is_none());
    assert!(calls[0].all_released);

    assert_eq!(h.metrics.counter(DOCUMENT_ERRORS), 2);
    assert_eq!(h.metrics.counter(BULK_REQUEST_FAILED), 1);
    assert_eq!(h.metrics.tagged_counter(DOCUMENT_STATUSES, STATUS_TAG, "400"), 1);
    assert_eq!(h.metrics.tagged_counter(DOCUMENT_STATUSES, STATUS_TAG, "404"), 1);
    assert_eq!(h.metrics.counter(BULK_REQUEST_NUMBER_OF_RETRIES), 0);
}

#[tokio::test]
async fn test_retry_carries_only_retryable_items_in_order() {
    let h = harness(RetryConfig::immediate(Some(5)));
    h.sender.push_statuses(&[503, 201, 429, 400, 500]).await;
    h.sender.push_statuses(&[201, 429, 201]).await;
    let (request, handles) = request_of(5);

    let summary = h.engine.execute(request).await;

    assert_eq!(
        h.sender.sent_ids().await,
        vec![
            vec!["1", "2", "3", "4", "5"],
            vec!["1", "3", "5"],
            vec!["3"],
        ]
    );
    assert_eq!(summary.attempts, 3);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);
    assert_released_once(&handles, &[true, true, true, false, true]);
    assert_eq!(h.metrics.counter(DOCUMENTS_SUCCESS), 4);
    assert_eq!(h.metrics.counter(DOCUMENTS_SUCCESS_FIRST_ATTEMPT), 1);
    assert_eq!(h.metrics.counter(BULK_REQUEST_NUMBER_OF_RETRIES), 2);
}

#[tokio::test]
async fn test_non_retryable_error_fails_whole_batch() {
    let h = harness(RetryConfig::immediate(Some(5)));
    h.sender
        .push_error(BulkError::MalformedRequest("missing index".to_string()))
        .await;
    let (request, handles) = request_of(2);

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.attempts, 1);
    assert_released_once(&handles, &[false, false]);
    let calls = h.consumer.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cause_kind, Some(ErrorKind::MalformedRequest));
    assert_eq!(calls[0].kinds, vec![ErrorKind::MalformedRequest; 2]);
    assert_eq!(h.metrics.counter(BULK_REQUEST_ERRORS), 1);
}

#[tokio::test]
async fn test_client_error_status_is_not_retried() {
    let h = harness(RetryConfig::immediate(Some(5)));
    h.sender.push_error(server_error(403)).await;
    let (request, handles) = request_of(2);

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.attempts, 1);
    assert_released_once(&handles, &[false, false]);
    assert_eq!(h.metrics.counter(BULK_REQUEST_NOT_ALLOWED_ERRORS), 1);
    let calls = h.consumer.calls().await;
    assert_eq!(calls[0].cause_kind, Some(ErrorKind::Validation));
}

#[tokio::test]
async fn test_retryable_error_resends_same_request() {
    let h = harness(RetryConfig::immediate(Some(5)));
    h.sender.push_error(io_error()).await;
    h.sender.push_error(server_error(502)).await;
    let (request, handles) = request_of(3);

    let summary = h.engine.execute(request).await;

    let sent = h.sender.sent_ids().await;
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|ids| ids == &vec!["1", "2", "3"]));
    assert_eq!(summary.succeeded, 3);
    assert_released_once(&handles, &[true, true, true]);
    assert_eq!(h.metrics.counter(BULK_REQUEST_ERRORS), 2);
    assert_eq!(h.metrics.counter(BULK_REQUEST_SERVER_ERRORS), 1);
    assert_eq!(h.metrics.counter(DOCUMENTS_SUCCESS_FIRST_ATTEMPT), 0);
    assert_eq!(h.metrics.durations(BULK_REQUEST_LATENCY).len(), 3);
    assert_eq!(h.consumer.call_count().await, 0);
}

#[tokio::test]
async fn test_retryable_error_at_budget_exhausts() {
    let h = harness(RetryConfig::immediate(Some(1)));
    h.sender.push_error(io_error()).await;
    h.sender.push_error(io_error()).await;
    let (request, handles) = request_of(2);

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.attempts, 2);
    assert_released_once(&handles, &[false, false]);
    let calls = h.consumer.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cause_kind, Some(ErrorKind::RetryBudgetExhausted));
    assert_eq!(calls[0].kinds, vec![ErrorKind::RetryBudgetExhausted; 2]);
    let cause = calls[0].cause.clone().unwrap();
    assert!(cause.contains("max retries"), "{}", cause);
    assert!(cause.contains("connection reset"), "{}", cause);
}

#[tokio::test]
async fn test_zero_retries_means_one_attempt() {
    let h = harness(RetryConfig::immediate(Some(0)));
    h.sender.push_statuses(&[201, 429]).await;
    let (request, handles) = request_of(2);

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.attempts, 1);
    assert_released_once(&handles, &[true, false]);
    let calls = h.consumer.calls().await;
    assert_eq!(calls[0].ids, vec!["2"]);
    assert_eq!(calls[0].kinds, vec![ErrorKind::RetryBudgetExhausted]);
}

#[tokio::test]
async fn test_budget_exhaustion_merges_with_earlier_terminal_failures() {
    let h = harness(RetryConfig::immediate(Some(2)));
    h.sender.push_statuses(&[400, 503, 201]).await;
    h.sender.set_fallback_status(503).await;
    let (request, handles) = request_of(3);

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.attempts, 3);
    assert_released_once(&handles, &[false, false, true]);
    let calls = h.consumer.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].ids, vec!["1", "2"]);
    assert_eq!(
        calls[0].kinds,
        vec![ErrorKind::Validation, ErrorKind::RetryBudgetExhausted]
    );
}

#[tokio::test]
async fn test_response_mismatch_fails_batch() {
    let h = harness(RetryConfig::immediate(Some(5)));
    h.sender
        .push(Reply::Response(BulkResponse::new(vec![BulkResponseItem::ok(
            BulkAction::Index,
            TEST_INDEX,
            201,
        )])))
        .await;
    let (request, handles) = request_of(2);

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.attempts, 1);
    assert_released_once(&handles, &[false, false]);
    let calls = h.consumer.calls().await;
    assert_eq!(calls[0].cause_kind, Some(ErrorKind::MalformedRequest));
    assert_eq!(calls[0].kinds, vec![ErrorKind::MalformedRequest; 2]);
    assert!(calls[0].cause.as_deref().unwrap().contains("1 items for 2"));
}

#[tokio::test]
async fn test_non_retryable_error_after_partial_attempt_merges_failures() {
    let h = harness(RetryConfig::immediate(Some(5)));
    h.sender.push_statuses(&[201, 400, 429]).await;
    h.sender
        .push_error(BulkError::MalformedRequest("mapping rejected".to_string()))
        .await;
    let (request, handles) = request_of(3);

    let summary = h.engine.execute(request).await;

    assert_eq!(
        summary,
        ExecutionSummary {
            attempts: 2,
            succeeded: 1,
            failed: 2
        }
    );
    assert_eq!(h.sender.sent_ids().await, vec![vec!["1", "2", "3"], vec!["3"]]);
    assert_released_once(&handles, &[true, false, false]);
    let calls = h.consumer.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].ids, vec!["2", "3"]);
    assert_eq!(
        calls[0].kinds,
        vec![ErrorKind::Validation, ErrorKind::MalformedRequest]
    );
    assert_eq!(calls[0].cause_kind, Some(ErrorKind::MalformedRequest));
    assert!(calls[0].all_released);
    assert_eq!(h.metrics.counter(DOCUMENT_ERRORS), 2);
    assert_eq!(h.metrics.counter(BULK_REQUEST_FAILED), 1);
}

#[tokio::test]
async fn test_version_conflicts_are_terminal_and_counted() {
    let h = harness(RetryConfig::immediate(Some(5)));
    let conflict = BulkResponseItem::failed(
        BulkAction::Index,
        TEST_INDEX,
        409,
        VERSION_CONFLICT_EXCEPTION_TYPE,
        "version conflict, current version [3] is higher",
    );
    h.sender
        .push(Reply::Response(BulkResponse::new(vec![
            conflict,
            BulkResponseItem::ok(BulkAction::Index, TEST_INDEX, 201),
        ])))
        .await;
    let (request, handles) = request_of(2);

    h.engine.execute(request).await;

    assert_released_once(&handles, &[false, true]);
    assert_eq!(h.metrics.counter(DOCUMENTS_VERSION_CONFLICT_ERRORS), 1);
    assert_eq!(h.metrics.counter(DOCUMENT_ERRORS), 1);
}

#[tokio::test]
async fn test_duplicate_writes_are_counted() {
    let h = harness(RetryConfig::immediate(Some(5)));
    let written = |seq_no| BulkResponseItem {
        seq_no: Some(seq_no),
        ..BulkResponseItem::ok(BulkAction::Index, TEST_INDEX, 200)
    };
    let mut response = BulkResponse::new(vec![written(3), written(0), written(7)]);
    response.took_ms = 12;
    h.sender.push(Reply::Response(response)).await;
    let (request, handles) = request_of(3);

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.succeeded, 3);
    assert_released_once(&handles, &[true, true, true]);
    assert_eq!(h.metrics.counter(DOCUMENTS_DUPLICATES), 2);
    assert_eq!(h.metrics.counter(DOCUMENTS_SUCCESS), 3);
}

#[tokio::test]
async fn test_first_writes_are_not_duplicates() {
    let h = harness(RetryConfig::immediate(Some(5)));
    let (request, _handles) = request_of(2);

    h.engine.execute(request).await;

    assert_eq!(h.metrics.counter(DOCUMENTS_DUPLICATES), 0);
}

#[tokio::test]
async fn test_operations_without_handles() {
    let h = harness(RetryConfig::immediate(Some(1)));
    h.sender.push_statuses(&[429, 400]).await;
    let mut request = AccumulatingRequest::new();
    request.add(OperationWrapper::new(index_operation("1")));
    request.add(OperationWrapper::new(BulkOperation::delete(TEST_INDEX, "2")));

    let summary = h.engine.execute(request).await;

    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_custom_request_factory_builds_retries() {
    struct CountingFactory(std::sync::atomic::AtomicUsize);

    impl RequestFactory for CountingFactory {
        fn create(&self) -> AccumulatingRequest {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            AccumulatingRequest::new()
        }
    }

    let factory = Arc::new(CountingFactory(Default::default()));
    let h = harness(RetryConfig::immediate(Some(5)));
    let engine = BulkRetryEngine::new(
        h.sender.clone(),
        h.consumer.clone(),
        h.metrics.clone(),
        RetryConfig::immediate(Some(5)),
    )
    .with_request_factory(factory.clone());
    h.sender.push_statuses(&[429, 201]).await;
    h.sender.push_statuses(&[503]).await;
    let (request, _handles) = request_of(2);

    engine.execute(request).await;

    assert_eq!(factory.0.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sleeps_between_attempts() {
    let config = RetryConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(250),
        multiplier: 2.0,
        max_retries: Some(3),
    };
    let h = harness(config);
    h.sender.set_fallback_status(429).await;
    let (request, handles) = request_of(1);

    let start = tokio::time::Instant::now();
    let summary = h.engine.execute(request).await;

    // 100 + 200 + 250 (capped)
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(550), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "{:?}", elapsed);
    assert_eq!(summary.attempts, 4);
    assert_released_once(&handles, &[false]);
}

#[tokio::test]
async fn test_can_retry_delegates_to_classification() {
    let h = harness(RetryConfig::default());
    let retryable = BulkResponse::new(vec![
        BulkResponseItem::ok(BulkAction::Index, TEST_INDEX, 201),
        BulkResponseItem::failed(BulkAction::Index, TEST_INDEX, 429, "x", "y"),
    ]);
    let terminal = BulkResponse::new(vec![BulkResponseItem::failed(
        BulkAction::Index,
        TEST_INDEX,
        400,
        "x",
        "y",
    )]);

    assert!(h.engine.can_retry(&retryable));
    assert!(!h.engine.can_retry(&terminal));
    assert!(!h.engine.can_retry(&BulkResponse::default()));
}

#[test]
fn test_retry_reason_truncates() {
    let candidates: Vec<_> = (1..=5)
        .map(|i| {
            let (wrapper, _) = wrapped(&i.to_string());
            let item = item_for(wrapper.operation(), 429);
            let cause = FailureCause::from_item(&item);
            (wrapper, cause)
        })
        .collect();

    let reason = retry_reason(&candidates);
    assert!(reason.starts_with("index test-index [rejected execution]"));
    assert!(reason.ends_with("and 2 more"));
}
