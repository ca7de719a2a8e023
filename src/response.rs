//! Bulk responses as returned by the send function.

use serde::{Deserialize, Serialize};

use crate::operation::BulkAction;
use crate::status::{classify_item, ItemOutcome};

/// Store-reported error for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub reason: String,
}

/// Outcome of one operation, positionally matching the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkResponseItem {
    pub action: BulkAction,
    pub index: String,
    pub id: Option<String>,
    pub status: u16,
    pub error: Option<ItemError>,
    /// Sequence number assigned by the store, when it reports one.
    pub seq_no: Option<i64>,
}

impl BulkResponseItem {
    /// Successful item with the given status.
    pub fn ok(action: BulkAction, index: impl Into<String>, status: u16) -> Self {
        Self {
            action,
            index: index.into(),
            id: None,
            status,
            error: None,
            seq_no: None,
        }
    }

    /// Failed item with the given status and error.
    pub fn failed(
        action: BulkAction,
        index: impl Into<String>,
        status: u16,
        error_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            index: index.into(),
            id: None,
            status,
            error: Some(ItemError {
                error_type: error_type.into(),
                reason: reason.into(),
            }),
            seq_no: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// A status of 300 or above, or any error body, marks the item failed.
    pub fn is_error(&self) -> bool {
        self.status >= 300 || self.error.is_some()
    }

    /// The store had seen this document before, e.g. a resend after a
    /// lost response.
    pub fn is_duplicate(&self) -> bool {
        self.seq_no.is_some_and(|seq_no| seq_no > 0)
    }

    pub fn outcome(&self) -> ItemOutcome {
        classify_item(self)
    }

    pub fn error_type(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.error_type.as_str())
    }

    pub fn reason(&self) -> &str {
        self.error.as_ref().map(|e| e.reason.as_str()).unwrap_or("")
    }
}

/// Per-item results of one bulk call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<BulkResponseItem>,
    pub took_ms: u64,
}

impl BulkResponse {
    pub fn new(items: Vec<BulkResponseItem>) -> Self {
        Self { items, took_ms: 0 }
    }

    /// Whether any item failed.
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(BulkResponseItem::is_error)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
