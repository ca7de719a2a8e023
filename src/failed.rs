//! Permanently failed operations handed to the failure consumer.

use crate::error::{BulkError, ErrorKind, FailureCause};
use crate::operation::OperationWrapper;
use crate::response::BulkResponseItem;

/// An operation whose fate is sealed, with the reason why.
///
/// The wrapper's event handle has already been released by the time a
/// consumer sees this.
#[derive(Debug)]
pub struct FailedOperation {
    operation: OperationWrapper,
    cause: FailureCause,
}

impl FailedOperation {
    pub fn new(operation: OperationWrapper, cause: FailureCause) -> Self {
        Self { operation, cause }
    }

    /// Failure reported for this operation's response item.
    pub fn from_item(operation: OperationWrapper, item: &BulkResponseItem) -> Self {
        Self::new(operation, FailureCause::from_item(item))
    }

    /// Failure of the whole request this operation was part of.
    pub fn from_error(operation: OperationWrapper, error: &BulkError) -> Self {
        Self::new(operation, FailureCause::from_error(error))
    }

    pub fn operation(&self) -> &OperationWrapper {
        &self.operation
    }

    pub fn cause(&self) -> &FailureCause {
        &self.cause
    }

    pub fn kind(&self) -> ErrorKind {
        self.cause.kind
    }

    pub fn is_retry_budget_exhausted(&self) -> bool {
        self.cause.kind == ErrorKind::RetryBudgetExhausted
    }

    pub fn into_parts(self) -> (OperationWrapper, FailureCause) {
        (self.operation, self.cause)
    }
}
