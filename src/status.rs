//! Status classification for response items and request errors.
//!
//! Pure functions over a closed outcome enum; the engine matches on the
//! result instead of dispatching on item types.

use crate::response::{BulkResponse, BulkResponseItem};

/// Error type the store reports for optimistic-concurrency conflicts.
pub const VERSION_CONFLICT_EXCEPTION_TYPE: &str = "version_conflict_engine_exception";

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemOutcome {
    Success,
    /// 429, retry.
    Throttled,
    /// 5xx, retry.
    ServerError,
    /// Anything else that failed; terminal.
    Validation,
}

impl ItemOutcome {
    pub fn is_retryable(self) -> bool {
        matches!(self, ItemOutcome::Throttled | ItemOutcome::ServerError)
    }
}

/// Classify a bare HTTP status.
pub fn classify_status(status: u16) -> ItemOutcome {
    match status {
        200..=299 => ItemOutcome::Success,
        429 => ItemOutcome::Throttled,
        500..=599 => ItemOutcome::ServerError,
        _ => ItemOutcome::Validation,
    }
}

/// Classify a response item. An error body on a 2xx item is terminal.
pub fn classify_item(item: &BulkResponseItem) -> ItemOutcome {
    match classify_status(item.status) {
        ItemOutcome::Success if item.error.is_some() => ItemOutcome::Validation,
        outcome => outcome,
    }
}

/// True iff at least one item failed with a retryable status.
pub fn can_retry(response: &BulkResponse) -> bool {
    response
        .items
        .iter()
        .any(|item| classify_item(item).is_retryable())
}

/// True for items rejected because a newer version already exists.
pub fn is_version_conflict(item: &BulkResponseItem) -> bool {
    item.error_type() == Some(VERSION_CONFLICT_EXCEPTION_TYPE)
}

/// Category of a failed bulk request, used for error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestErrorCategory {
    BadRequest,
    NotAllowed,
    InvalidInput,
    NotFound,
    Timeout,
    Server,
}

/// Bucket a request-level HTTP status.
pub fn categorize_request_status(status: u16) -> RequestErrorCategory {
    match status {
        401 | 402 | 403 | 405 | 407 | 423 | 429 => RequestErrorCategory::NotAllowed,
        409 | 411 | 412 | 413 | 414 | 415 | 416 => RequestErrorCategory::InvalidInput,
        404 | 410 => RequestErrorCategory::NotFound,
        408 => RequestErrorCategory::Timeout,
        s if s >= 500 => RequestErrorCategory::Server,
        _ => RequestErrorCategory::BadRequest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::BulkAction;

    fn ok(status: u16) -> BulkResponseItem {
        BulkResponseItem::ok(BulkAction::Index, "logs", status)
    }

    fn failed(status: u16) -> BulkResponseItem {
        BulkResponseItem::failed(BulkAction::Index, "logs", status, "some_exception", "boom")
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), ItemOutcome::Success);
        assert_eq!(classify_status(201), ItemOutcome::Success);
        assert_eq!(classify_status(429), ItemOutcome::Throttled);
        assert_eq!(classify_status(500), ItemOutcome::ServerError);
        assert_eq!(classify_status(503), ItemOutcome::ServerError);
        assert_eq!(classify_status(400), ItemOutcome::Validation);
        assert_eq!(classify_status(404), ItemOutcome::Validation);
        assert_eq!(classify_status(409), ItemOutcome::Validation);
        assert_eq!(classify_status(302), ItemOutcome::Validation);
    }

    #[test]
    fn test_error_body_on_success_status_is_terminal() {
        let item = BulkResponseItem::failed(BulkAction::Index, "logs", 200, "x", "y");
        assert_eq!(classify_item(&item), ItemOutcome::Validation);
    }

    #[test]
    fn test_can_retry() {
        assert!(!can_retry(&BulkResponse::new(vec![ok(201), ok(200)])));
        assert!(!can_retry(&BulkResponse::new(vec![ok(201), failed(400), failed(404)])));
        assert!(can_retry(&BulkResponse::new(vec![ok(201), failed(429)])));
        assert!(can_retry(&BulkResponse::new(vec![failed(400), failed(502)])));
        assert!(!can_retry(&BulkResponse::default()));
    }

    #[test]
    fn test_version_conflict_detection() {
        let conflict = BulkResponseItem::failed(
            BulkAction::Index,
            "logs",
            409,
            VERSION_CONFLICT_EXCEPTION_TYPE,
            "version conflict",
        );
        assert!(is_version_conflict(&conflict));
        assert!(!is_version_conflict(&failed(409)));
    }

    #[test]
    fn test_categorize_request_status() {
        assert_eq!(categorize_request_status(400), RequestErrorCategory::BadRequest);
        assert_eq!(categorize_request_status(422), RequestErrorCategory::BadRequest);
        assert_eq!(categorize_request_status(403), RequestErrorCategory::NotAllowed);
        assert_eq!(categorize_request_status(429), RequestErrorCategory::NotAllowed);
        assert_eq!(categorize_request_status(413), RequestErrorCategory::InvalidInput);
        assert_eq!(categorize_request_status(404), RequestErrorCategory::NotFound);
        assert_eq!(categorize_request_status(408), RequestErrorCategory::Timeout);
        assert_eq!(categorize_request_status(500), RequestErrorCategory::Server);
    }
}
