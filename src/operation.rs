//! Write operations and the event handles they acknowledge.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Bulk API action for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Index,
    Create,
    Update,
    Upsert,
    Delete,
}

impl BulkAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Create => "create",
            BulkAction::Update => "update",
            BulkAction::Upsert => "upsert",
            BulkAction::Delete => "delete",
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one write.
///
/// The document is already serialized JSON; building it is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOperation {
    pub action: BulkAction,
    pub index: String,
    pub id: Option<String>,
    pub document: Option<String>,
    pub routing: Option<String>,
    pub version: Option<i64>,
}

impl BulkOperation {
    pub fn new(action: BulkAction, index: impl Into<String>) -> Self {
        Self {
            action,
            index: index.into(),
            id: None,
            document: None,
            routing: None,
            version: None,
        }
    }

    /// Index `document` into `index`.
    pub fn index(index: impl Into<String>, document: impl Into<String>) -> Self {
        Self::new(BulkAction::Index, index).with_document(document)
    }

    /// Delete document `id` from `index`.
    pub fn delete(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(BulkAction::Delete, index).with_id(id)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }
}

/// Acknowledgement capability for the source record behind an operation.
///
/// `release(true)` acknowledges the record upstream, `release(false)`
/// negatively acknowledges it.
pub trait EventHandle: Send + Sync {
    fn release(&self, success: bool);
}

/// One operation plus the handle of the event that produced it.
///
/// Retries move the same wrapper from request to request. Releasing takes
/// the handle out, so a wrapper can release at most once.
pub struct OperationWrapper {
    operation: BulkOperation,
    event_handle: Option<Arc<dyn EventHandle>>,
}

impl OperationWrapper {
    pub fn new(operation: BulkOperation) -> Self {
        Self {
            operation,
            event_handle: None,
        }
    }

    pub fn with_event_handle(operation: BulkOperation, handle: Arc<dyn EventHandle>) -> Self {
        Self {
            operation,
            event_handle: Some(handle),
        }
    }

    pub fn operation(&self) -> &BulkOperation {
        &self.operation
    }

    /// The handle, until it has been released.
    pub fn event_handle(&self) -> Option<&Arc<dyn EventHandle>> {
        self.event_handle.as_ref()
    }

    pub fn index(&self) -> &str {
        &self.operation.index
    }

    pub fn id(&self) -> Option<&str> {
        self.operation.id.as_deref()
    }

    /// Forward the outcome to the event handle, if one is still held.
    pub fn release_event_handle(&mut self, success: bool) {
        if let Some(handle) = self.event_handle.take() {
            handle.release(success);
        }
    }

    /// Whether the handle has been released (or there never was one).
    pub fn is_released(&self) -> bool {
        self.event_handle.is_none()
    }
}

impl fmt::Debug for OperationWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationWrapper")
            .field("operation", &self.operation)
            .field("has_event_handle", &self.event_handle.is_some())
            .finish()
    }
}
