//! Accumulating bulk requests and their wire-format snapshot.

use serde_json::{Map, Value};

use crate::operation::{BulkAction, BulkOperation, OperationWrapper};

/// Append-only batch of operations for one send attempt.
///
/// Position matters: `operation_at(i)` answers for `response.items[i]` of
/// any response produced from this exact request. Shrinking a batch means
/// building a new request from a subset.
#[derive(Debug, Default)]
pub struct AccumulatingRequest {
    operations: Vec<OperationWrapper>,
    estimated_size_bytes: u64,
}

impl AccumulatingRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            operations: Vec::with_capacity(capacity),
            estimated_size_bytes: 0,
        }
    }

    pub fn add(&mut self, wrapper: OperationWrapper) {
        self.estimated_size_bytes += estimate_operation_size(wrapper.operation());
        self.operations.push(wrapper);
    }

    pub fn operation_at(&self, index: usize) -> Option<&OperationWrapper> {
        self.operations.get(index)
    }

    pub fn operations(&self) -> &[OperationWrapper] {
        &self.operations
    }

    pub fn count(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn estimated_size_bytes(&self) -> u64 {
        self.estimated_size_bytes
    }

    /// Size this request would have after adding `wrapper`.
    pub fn estimate_size_with(&self, wrapper: &OperationWrapper) -> u64 {
        self.estimated_size_bytes + estimate_operation_size(wrapper.operation())
    }

    /// Freeze the current operations into the wire-format request.
    pub fn snapshot(&self) -> BulkRequest<'_> {
        BulkRequest {
            operations: self.operations.iter().map(|w| w.operation()).collect(),
        }
    }

    /// Give up the wrappers, in insertion order.
    pub fn into_operations(self) -> Vec<OperationWrapper> {
        self.operations
    }
}

impl Extend<OperationWrapper> for AccumulatingRequest {
    fn extend<I: IntoIterator<Item = OperationWrapper>>(&mut self, iter: I) {
        for wrapper in iter {
            self.add(wrapper);
        }
    }
}

/// Builds empty requests for each batch and retry sub-batch.
pub trait RequestFactory: Send + Sync {
    fn create(&self) -> AccumulatingRequest;
}

/// Factory producing plain uncompressed requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRequestFactory;

impl RequestFactory for DefaultRequestFactory {
    fn create(&self) -> AccumulatingRequest {
        AccumulatingRequest::new()
    }
}

/// Read-only view of a request as sent over the wire.
#[derive(Debug, Clone)]
pub struct BulkRequest<'a> {
    operations: Vec<&'a BulkOperation>,
}

impl<'a> BulkRequest<'a> {
    pub fn operations(&self) -> &[&'a BulkOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Render the newline-delimited bulk API body.
    pub fn to_ndjson(&self) -> String {
        let mut body = String::new();
        for operation in &self.operations {
            body.push_str(&metadata_line(operation));
            body.push('\n');
            if let Some(source) = source_line(operation) {
                body.push_str(&source);
                body.push('\n');
            }
        }
        body
    }
}

fn estimate_operation_size(operation: &BulkOperation) -> u64 {
    let metadata = metadata_line(operation).len() + 1;
    let source = source_line(operation).map(|s| s.len() + 1).unwrap_or(0);
    (metadata + source) as u64
}

fn metadata_line(operation: &BulkOperation) -> String {
    let mut meta = Map::new();
    meta.insert("_index".to_string(), Value::from(operation.index.as_str()));
    if let Some(id) = &operation.id {
        meta.insert("_id".to_string(), Value::from(id.as_str()));
    }
    if let Some(routing) = &operation.routing {
        meta.insert("routing".to_string(), Value::from(routing.as_str()));
    }
    if let Some(version) = operation.version {
        meta.insert("version".to_string(), Value::from(version));
        meta.insert("version_type".to_string(), Value::from("external"));
    }
    let action = match operation.action {
        BulkAction::Upsert => "update",
        other => other.as_str(),
    };
    let mut line = Map::new();
    line.insert(action.to_string(), Value::Object(meta));
    Value::Object(line).to_string()
}

fn source_line(operation: &BulkOperation) -> Option<String> {
    let document = operation.document.as_deref()?;
    match operation.action {
        BulkAction::Index | BulkAction::Create => Some(document.to_string()),
        BulkAction::Update => Some(format!(r#"{{"doc":{}}}"#, document)),
        BulkAction::Upsert => Some(format!(r#"{{"doc":{},"doc_as_upsert":true}}"#, document)),
        BulkAction::Delete => None,
    }
}
