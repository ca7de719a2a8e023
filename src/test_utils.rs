//! Test utilities and mock implementations.
//!
//! Mocks of the engine's seams for exercising retry behavior without a
//! search store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::{BulkSender, FailureConsumer};
use crate::error::{BulkError, ErrorKind, Result};
use crate::failed::FailedOperation;
use crate::operation::{BulkOperation, EventHandle, OperationWrapper};
use crate::request::AccumulatingRequest;
use crate::response::{BulkResponse, BulkResponseItem, ItemError};

/// Index used by the helpers below.
pub const TEST_INDEX: &str = "test-index";

/// Event handle that records every release it receives.
#[derive(Debug, Default)]
pub struct RecordingHandle {
    releases: Mutex<Vec<bool>>,
}

impl RecordingHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every release, in order.
    pub fn releases(&self) -> Vec<bool> {
        self.releases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn release_count(&self) -> usize {
        self.releases().len()
    }

    /// The single release outcome, or `None` if released zero or many times.
    pub fn released_once(&self) -> Option<bool> {
        match self.releases().as_slice() {
            [success] => Some(*success),
            _ => None,
        }
    }
}

impl EventHandle for RecordingHandle {
    fn release(&self, success: bool) {
        self.releases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(success);
    }
}

/// Index operation with a small document and the given id.
pub fn index_operation(id: &str) -> BulkOperation {
    BulkOperation::index(TEST_INDEX, format!(r#"{{"message":"event {}"}}"#, id)).with_id(id)
}

/// Wrapper around `index_operation(id)` holding a recording handle.
pub fn wrapped(id: &str) -> (OperationWrapper, Arc<RecordingHandle>) {
    let handle = RecordingHandle::new();
    let wrapper = OperationWrapper::with_event_handle(index_operation(id), handle.clone());
    (wrapper, handle)
}

/// Request of `n` wrapped operations with ids "1".."n".
pub fn request_of(n: usize) -> (AccumulatingRequest, Vec<Arc<RecordingHandle>>) {
    let mut request = AccumulatingRequest::new();
    let mut handles = Vec::with_capacity(n);
    for i in 1..=n {
        let (wrapper, handle) = wrapped(&i.to_string());
        request.add(wrapper);
        handles.push(handle);
    }
    (request, handles)
}

/// Response item for `operation` with `status`, with an error body when the
/// status is a failure.
pub fn item_for(operation: &BulkOperation, status: u16) -> BulkResponseItem {
    let error = match status {
        200..=299 => None,
        429 => Some(("es_rejected_execution_exception", "rejected execution")),
        500..=599 => Some(("internal_server_error", "shard failure")),
        _ => Some(("mapper_parsing_exception", "failed to parse field")),
    };
    BulkResponseItem {
        action: operation.action,
        index: operation.index.clone(),
        id: operation.id.clone(),
        status,
        error: error.map(|(error_type, reason)| ItemError {
            error_type: error_type.to_string(),
            reason: reason.to_string(),
        }),
        seq_no: None,
    }
}

/// Scripted reply to one send.
pub enum Reply {
    /// One status per operation, positionally.
    Statuses(Vec<u16>),
    /// Fixed response, regardless of the request.
    Response(BulkResponse),
    /// Fail the whole request.
    Error(BulkError),
}

/// Sender that plays back scripted replies and records every request.
///
/// Once the script runs out, every operation gets `fallback_status`
/// (201 unless changed).
pub struct ScriptedSender {
    script: RwLock<VecDeque<Reply>>,
    fallback_status: RwLock<u16>,
    sent: RwLock<Vec<Vec<String>>>,
}

impl Default for ScriptedSender {
    fn default() -> Self {
        Self {
            script: RwLock::new(VecDeque::new()),
            fallback_status: RwLock::new(201),
            sent: RwLock::new(Vec::new()),
        }
    }
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, reply: Reply) {
        self.script.write().await.push_back(reply);
    }

    pub async fn push_statuses(&self, statuses: &[u16]) {
        self.push(Reply::Statuses(statuses.to_vec())).await;
    }

    pub async fn push_error(&self, error: BulkError) {
        self.push(Reply::Error(error)).await;
    }

    pub async fn set_fallback_status(&self, status: u16) {
        *self.fallback_status.write().await = status;
    }

    /// Ids of the operations in each request received, in order.
    pub async fn sent_ids(&self) -> Vec<Vec<String>> {
        self.sent.read().await.clone()
    }

    pub async fn attempts(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl BulkSender for ScriptedSender {
    async fn send(&self, request: &AccumulatingRequest) -> Result<BulkResponse> {
        let ids = request
            .operations()
            .iter()
            .map(|w| w.id().unwrap_or_default().to_string())
            .collect();
        self.sent.write().await.push(ids);

        let reply = self.script.write().await.pop_front();
        let operations = request.snapshot();
        match reply {
            Some(Reply::Statuses(statuses)) => Ok(BulkResponse::new(
                operations
                    .operations()
                    .iter()
                    .zip(statuses)
                    .map(|(op, status)| item_for(op, status))
                    .collect(),
            )),
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Error(e)) => Err(e),
            None => {
                let status = *self.fallback_status.read().await;
                Ok(BulkResponse::new(
                    operations
                        .operations()
                        .iter()
                        .map(|op| item_for(op, status))
                        .collect(),
                ))
            }
        }
    }
}

/// What a failure consumer received in one call.
#[derive(Debug, Clone)]
pub struct ConsumerCall {
    /// Ids of the failed operations, in order.
    pub ids: Vec<String>,
    /// Failure kind of each operation.
    pub kinds: Vec<ErrorKind>,
    /// Whether every wrapper had already released its handle.
    pub all_released: bool,
    pub cause: Option<String>,
    pub cause_kind: Option<ErrorKind>,
}

/// Failure consumer that records every call.
#[derive(Default)]
pub struct RecordingConsumer {
    calls: RwLock<Vec<ConsumerCall>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<ConsumerCall> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl FailureConsumer for RecordingConsumer {
    async fn consume(&self, failures: Vec<FailedOperation>, cause: Option<&BulkError>) {
        let call = ConsumerCall {
            ids: failures
                .iter()
                .map(|f| f.operation().id().unwrap_or_default().to_string())
                .collect(),
            kinds: failures.iter().map(FailedOperation::kind).collect(),
            all_released: failures.iter().all(|f| f.operation().is_released()),
            cause: cause.map(ToString::to_string),
            cause_kind: cause.map(BulkError::kind),
        };
        self.calls.write().await.push(call);
    }
}

/// Retryable server error as thrown by a transport.
pub fn server_error(status: u16) -> BulkError {
    BulkError::Server {
        status,
        reason: "scripted".to_string(),
    }
}

/// Retryable I/O error.
pub fn io_error() -> BulkError {
    BulkError::Transport(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}
