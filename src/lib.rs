//! bulk-retry - reliable bulk writes for search-store sinks
//!
//! Sends batches of write operations through an injected transport,
//! retries only transiently failed operations in shrinking sub-batches with
//! capped exponential backoff, routes permanent failures to a dead-letter
//! consumer, and acknowledges every source event exactly once.

pub mod config;
pub mod dlq;
pub mod engine;
pub mod error;
pub mod failed;
pub mod metrics;
pub mod operation;
pub mod request;
pub mod response;
pub mod retry;
pub mod sink;
pub mod status;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;

pub use config::{ConfigError, SinkConfig};
pub use dlq::{DeadLetter, DeadLetterWriter, DlqConfig, DlqError, DlqFailureConsumer};
pub use engine::{BulkRetryEngine, BulkSender, ExecutionSummary, FailureConsumer};
pub use error::{BulkError, ErrorKind, FailureCause};
pub use failed::FailedOperation;
pub use metrics::{InMemoryMetrics, MetricSink, NoopMetrics};
pub use operation::{BulkAction, BulkOperation, EventHandle, OperationWrapper};
pub use request::{AccumulatingRequest, DefaultRequestFactory, RequestFactory};
pub use response::{BulkResponse, BulkResponseItem, ItemError};
pub use retry::RetryConfig;
pub use sink::{BulkConfig, BulkSink};
pub use status::{can_retry, ItemOutcome};
