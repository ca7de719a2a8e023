//! Error taxonomy for bulk writes.
//!
//! `BulkError` is what a send attempt can fail with (plus the engine's own
//! budget-exhaustion and mismatch markers). `FailureCause` is the structured,
//! cloneable cause attached to each permanently failed operation.

use serde::Serialize;

use crate::response::BulkResponseItem;
use crate::status::{classify_status, ItemOutcome};

/// Result type for send operations.
pub type Result<T> = std::result::Result<T, BulkError>;

/// Errors surfaced by a bulk send or by the retry engine itself.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// Network or I/O failure talking to the store.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The store rejected the whole request with an HTTP status.
    #[error("Server returned {status}: {reason}")]
    Server { status: u16, reason: String },

    /// The request could not be built or was rejected client-side.
    #[error("Malformed bulk request: {0}")]
    MalformedRequest(String),

    /// The response did not correlate with the request that produced it.
    #[error("Bulk response has {actual} items for {expected} operations")]
    ResponseMismatch { expected: usize, actual: usize },

    /// Retryable failures remained after the configured number of retries.
    #[error(
        "Number of retries reached the limit of max retries (configured value {max_retries}). Last failure: {last_failure}"
    )]
    RetryBudgetExhausted { max_retries: u32, last_failure: String },
}

impl BulkError {
    /// Classify this error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BulkError::Transport(_) => ErrorKind::TransientTransport,
            BulkError::Server { status, .. } => ErrorKind::from_status(*status),
            BulkError::MalformedRequest(_) | BulkError::ResponseMismatch { .. } => {
                ErrorKind::MalformedRequest
            }
            BulkError::RetryBudgetExhausted { .. } => ErrorKind::RetryBudgetExhausted,
        }
    }

    /// Whether resending the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            BulkError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure classes shared by item statuses and request errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 429 Too Many Requests.
    Throttling,
    /// Any 5xx.
    ServerError,
    /// Thrown I/O or network failure.
    TransientTransport,
    /// 4xx other than 429, or an item error without a retryable status.
    Validation,
    /// Client-side rejection of the whole batch.
    MalformedRequest,
    /// Retry budget spent with retryable failures outstanding.
    RetryBudgetExhausted,
}

impl ErrorKind {
    /// Map an HTTP status to its failure class.
    pub fn from_status(status: u16) -> Self {
        match classify_status(status) {
            ItemOutcome::Throttled => ErrorKind::Throttling,
            ItemOutcome::ServerError => ErrorKind::ServerError,
            ItemOutcome::Success | ItemOutcome::Validation => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Throttling | ErrorKind::ServerError | ErrorKind::TransientTransport
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Throttling => "throttling",
            ErrorKind::ServerError => "server_error",
            ErrorKind::TransientTransport => "transient_transport",
            ErrorKind::Validation => "validation",
            ErrorKind::MalformedRequest => "malformed_request",
            ErrorKind::RetryBudgetExhausted => "retry_budget_exhausted",
        }
    }
}

/// Structured cause attached to a failed operation.
///
/// Unlike `BulkError` this is cheap to clone, so every operation of a failed
/// batch can carry its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCause {
    pub kind: ErrorKind,
    /// HTTP status of the item or request, when one exists.
    pub status: Option<u16>,
    /// Store-reported error type, e.g. `mapper_parsing_exception`.
    pub error_type: Option<String>,
    pub reason: String,
    /// What led to this cause (e.g. the last transient failure before the
    /// budget ran out).
    pub source: Option<Box<FailureCause>>,
}

impl FailureCause {
    /// Cause for a failed response item.
    pub fn from_item(item: &BulkResponseItem) -> Self {
        let (error_type, reason) = match &item.error {
            Some(error) => (Some(error.error_type.clone()), error.reason.clone()),
            None => (None, format!("status {}", item.status)),
        };
        Self {
            kind: ErrorKind::from_status(item.status),
            status: Some(item.status),
            error_type,
            reason,
            source: None,
        }
    }

    /// Cause for every operation of a batch that failed as a whole.
    pub fn from_error(error: &BulkError) -> Self {
        Self {
            kind: error.kind(),
            status: error.status(),
            error_type: None,
            reason: error.to_string(),
            source: None,
        }
    }

    /// Budget-exhaustion marker wrapping the last transient failure.
    pub fn retry_budget_exhausted(max_retries: u32, last: FailureCause) -> Self {
        Self {
            kind: ErrorKind::RetryBudgetExhausted,
            status: last.status,
            error_type: None,
            reason: format!(
                "Number of retries reached the limit of max retries (configured value {})",
                max_retries
            ),
            source: Some(Box::new(last)),
        }
    }

    /// Iterate this cause and everything beneath it.
    pub fn chain(&self) -> impl Iterator<Item = &FailureCause> {
        std::iter::successors(Some(self), |cause| cause.source.as_deref())
    }

    /// The innermost cause in the chain.
    pub fn root(&self) -> &FailureCause {
        self.chain().last().unwrap_or(self)
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}
