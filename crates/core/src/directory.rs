//! The execution engine's view of its own queue and history.
//!
//! [`ExecutionDirectory`] is the seam between the tracker and whatever owns
//! the authoritative job queue. Production uses the ComfyUI REST adapter;
//! tests use [`InMemoryDirectory`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::events::{EventHandler, EVENT_EXECUTION_START};
use crate::types::PromptId;
use crate::workflow::ExecutionGraph;

/// One queued or running execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub prompt_id: PromptId,
    pub graph: Arc<ExecutionGraph>,
    /// Id of the client that submitted the execution, when known.
    pub client_id: Option<String>,
}

impl ExecutionRecord {
    pub fn new(prompt_id: impl Into<PromptId>, graph: ExecutionGraph) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            graph: Arc::new(graph),
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// Running and pending executions, in engine order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueState {
    pub running: Vec<ExecutionRecord>,
    pub pending: Vec<ExecutionRecord>,
}

impl QueueState {
    pub fn find_running(&self, prompt_id: &str) -> Option<&ExecutionRecord> {
        self.running.iter().find(|r| r.prompt_id == prompt_id)
    }

    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.find_running(prompt_id).is_some()
    }

    pub fn is_pending(&self, prompt_id: &str) -> bool {
        self.pending.iter().any(|r| r.prompt_id == prompt_id)
    }
}

/// Final outcome recorded in the engine's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Success,
    Error,
    Unknown,
}

impl HistoryStatus {
    /// Map ComfyUI's `status.status_str`.
    pub fn from_status_str(status: Option<&str>) -> Self {
        match status {
            Some("success") => Self::Success,
            Some("error") => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// History entry of a finished execution.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub status: HistoryStatus,
    /// Per-node outputs, as the engine reports them.
    pub outputs: Value,
    /// Status messages stored with the entry (error details, timings).
    pub messages: Vec<Value>,
}

impl HistoryRecord {
    pub fn success(outputs: Value) -> Self {
        Self {
            status: HistoryStatus::Success,
            outputs,
            messages: Vec::new(),
        }
    }

    pub fn error(messages: Vec<Value>) -> Self {
        Self {
            status: HistoryStatus::Error,
            outputs: Value::Object(Default::default()),
            messages,
        }
    }
}

/// Read access to the engine's queue and history.
///
/// Every lookup may suspend on I/O. Callers must not hold the tracker lock
/// across these calls.
#[async_trait]
pub trait ExecutionDirectory: Send + Sync {
    async fn list_queue(&self) -> Result<QueueState, CoreError>;

    async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryRecord>, CoreError>;

    /// Best-effort hint of the execution currently being processed.
    async fn current_processing_id(&self) -> Result<Option<PromptId>, CoreError>;
}

// ---------------------------------------------------------------------------
// InMemoryDirectory
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct DirectoryState {
    queue: QueueState,
    history: HashMap<PromptId, HistoryRecord>,
    processing: Option<PromptId>,
    available: bool,
}

/// Directory backed by in-process state, for tests and local replay.
#[derive(Debug)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DirectoryState {
                queue: QueueState::default(),
                history: HashMap::new(),
                processing: None,
                available: true,
            }),
        }
    }

    pub async fn set_queue(&self, queue: QueueState) {
        self.state.write().await.queue = queue;
    }

    pub async fn set_processing(&self, prompt_id: Option<PromptId>) {
        self.state.write().await.processing = prompt_id;
    }

    pub async fn insert_history(&self, prompt_id: impl Into<PromptId>, record: HistoryRecord) {
        self.state
            .write()
            .await
            .history
            .insert(prompt_id.into(), record);
    }

    /// Make every lookup fail with [`CoreError::DirectoryUnavailable`].
    pub async fn set_available(&self, available: bool) {
        self.state.write().await.available = available;
    }

    async fn read(&self) -> Result<tokio::sync::RwLockReadGuard<'_, DirectoryState>, CoreError> {
        let state = self.state.read().await;
        if state.available {
            Ok(state)
        } else {
            Err(CoreError::DirectoryUnavailable(
                "in-memory directory marked unavailable".into(),
            ))
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionDirectory for InMemoryDirectory {
    async fn list_queue(&self) -> Result<QueueState, CoreError> {
        Ok(self.read().await?.queue.clone())
    }

    async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryRecord>, CoreError> {
        Ok(self.read().await?.history.get(prompt_id).cloned())
    }

    async fn current_processing_id(&self) -> Result<Option<PromptId>, CoreError> {
        Ok(self.read().await?.processing.clone())
    }
}

/// Records the id of each `execution_start` as the processing hint, like
/// the engine-backed directory does.
#[async_trait]
impl EventHandler for InMemoryDirectory {
    async fn handle_event(&self, kind: &str, payload: &Value) {
        if kind != EVENT_EXECUTION_START {
            return;
        }
        if let Some(prompt_id) = payload.get("prompt_id").and_then(Value::as_str) {
            self.state.write().await.processing = Some(prompt_id.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn history_status_mapping() {
        assert_eq!(HistoryStatus::from_status_str(Some("success")), HistoryStatus::Success);
        assert_eq!(HistoryStatus::from_status_str(Some("error")), HistoryStatus::Error);
        assert_eq!(HistoryStatus::from_status_str(Some("weird")), HistoryStatus::Unknown);
        assert_eq!(HistoryStatus::from_status_str(None), HistoryStatus::Unknown);
    }

    #[test]
    fn queue_membership() {
        let queue = QueueState {
            running: vec![ExecutionRecord::new("a", ExecutionGraph::default())],
            pending: vec![ExecutionRecord::new("b", ExecutionGraph::default())],
        };
        assert!(queue.is_running("a"));
        assert!(!queue.is_running("b"));
        assert!(queue.is_pending("b"));
        assert!(queue.find_running("c").is_none());
    }

    #[tokio::test]
    async fn unavailable_directory_fails_every_lookup() {
        let directory = InMemoryDirectory::new();
        directory.set_available(false).await;

        assert_matches!(directory.list_queue().await, Err(CoreError::DirectoryUnavailable(_)));
        assert_matches!(directory.get_history("x").await, Err(CoreError::DirectoryUnavailable(_)));
        assert_matches!(
            directory.current_processing_id().await,
            Err(CoreError::DirectoryUnavailable(_))
        );
    }

    #[tokio::test]
    async fn history_round_trip() {
        let directory = InMemoryDirectory::new();
        directory
            .insert_history("p1", HistoryRecord::success(serde_json::json!({"9": {}})))
            .await;

        let record = directory.get_history("p1").await.unwrap().unwrap();
        assert_eq!(record.status, HistoryStatus::Success);
        assert!(directory.get_history("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_start_sets_processing_hint() {
        let directory = InMemoryDirectory::new();
        directory.handle_event("executing", &serde_json::json!({"prompt_id": "p0"})).await;
        assert_eq!(directory.current_processing_id().await.unwrap(), None);

        directory
            .handle_event("execution_start", &serde_json::json!({"prompt_id": "p1"}))
            .await;
        assert_eq!(directory.current_processing_id().await.unwrap().as_deref(), Some("p1"));
    }
}
