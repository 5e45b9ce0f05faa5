//! [`ExecutionDirectory`] backed by the ComfyUI REST API.
//!
//! ComfyUI does not expose "the prompt currently being processed" over
//! HTTP, so [`ComfyUIDirectory`] also listens to the event stream and
//! remembers the id of the last `execution_start` it saw. Register it on
//! the [`EventSource`](crate::source::EventSource) *before* the tracker so
//! the hint is current by the time the tracker folds the same event.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use taskmon_core::directory::{
    ExecutionDirectory, ExecutionRecord, HistoryRecord, HistoryStatus, QueueState,
};
use taskmon_core::error::CoreError;
use taskmon_core::events::{EventHandler, EVENT_EXECUTION_START};
use taskmon_core::types::PromptId;
use taskmon_core::workflow::ExecutionGraph;

use crate::api::{ComfyUIApi, ComfyUIApiError};

pub struct ComfyUIDirectory {
    api: ComfyUIApi,
    last_started: RwLock<Option<PromptId>>,
}

impl ComfyUIDirectory {
    pub fn new(api: ComfyUIApi) -> Self {
        Self {
            api,
            last_started: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ExecutionDirectory for ComfyUIDirectory {
    async fn list_queue(&self) -> Result<QueueState, CoreError> {
        let response = self.api.get_queue().await.map_err(unavailable)?;
        Ok(QueueState {
            running: parse_queue_rows(&response.queue_running),
            pending: parse_queue_rows(&response.queue_pending),
        })
    }

    async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryRecord>, CoreError> {
        let body = self.api.get_history(prompt_id).await.map_err(unavailable)?;
        Ok(parse_history(&body, prompt_id))
    }

    async fn current_processing_id(&self) -> Result<Option<PromptId>, CoreError> {
        Ok(self.last_started.read().await.clone())
    }
}

#[async_trait]
impl EventHandler for ComfyUIDirectory {
    async fn handle_event(&self, kind: &str, payload: &Value) {
        if kind != EVENT_EXECUTION_START {
            return;
        }
        if let Some(prompt_id) = payload.get("prompt_id").and_then(Value::as_str) {
            *self.last_started.write().await = Some(prompt_id.to_owned());
        }
    }
}

fn unavailable(err: ComfyUIApiError) -> CoreError {
    CoreError::DirectoryUnavailable(err.to_string())
}

/// Decode `[number, prompt_id, graph, extra_data, outputs_to_execute]` rows.
///
/// Rows with fewer than three elements or a non-string id are skipped.
pub fn parse_queue_rows(rows: &[Value]) -> Vec<ExecutionRecord> {
    rows.iter()
        .filter_map(|row| {
            let fields = row.as_array().filter(|f| f.len() >= 3)?;
            let prompt_id = fields[1].as_str()?;
            let mut record = ExecutionRecord::new(prompt_id, ExecutionGraph::from_value(&fields[2]));
            if let Some(client_id) = fields
                .get(3)
                .and_then(|extra| extra.get("client_id"))
                .and_then(Value::as_str)
            {
                record = record.with_client_id(client_id);
            }
            Some(record)
        })
        .collect()
}

/// Extract the entry for `prompt_id` from a `GET /history/{id}` body.
///
/// `None` while the execution has no history entry yet.
pub fn parse_history(body: &Value, prompt_id: &str) -> Option<HistoryRecord> {
    let entry = body.get(prompt_id)?;
    let status = entry.get("status");
    Some(HistoryRecord {
        status: HistoryStatus::from_status_str(
            status
                .and_then(|s| s.get("status_str"))
                .and_then(Value::as_str),
        ),
        outputs: entry
            .get("outputs")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
        messages: status
            .and_then(|s| s.get("messages"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;

    fn graph() -> Value {
        json!({
            "3": {"class_type": "KSampler", "inputs": {}},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {}},
            "9": {"class_type": "TaskMonitorNode", "inputs": {}},
        })
    }

    #[test]
    fn queue_rows_are_decoded() {
        let rows = vec![json!([0, "p-1", graph(), {"client_id": "web-42"}, ["9"]])];
        let records = parse_queue_rows(&rows);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prompt_id, "p-1");
        assert_eq!(records[0].graph.len(), 3);
        assert_eq!(records[0].client_id.as_deref(), Some("web-42"));
    }

    #[test]
    fn malformed_queue_rows_are_skipped() {
        let rows = vec![
            json!([0, "short"]),
            json!([1, 42, graph()]),
            json!("not a row"),
            json!([2, "ok", graph()]),
        ];
        let records = parse_queue_rows(&rows);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prompt_id, "ok");
        assert_eq!(records[0].client_id, None);
    }

    #[test]
    fn history_success_entry() {
        let body = json!({
            "p-1": {
                "outputs": {"9": {"images": [{"filename": "out.png"}]}},
                "status": {"status_str": "success", "completed": true, "messages": []},
            }
        });
        let record = parse_history(&body, "p-1").unwrap();

        assert_eq!(record.status, HistoryStatus::Success);
        assert_eq!(record.outputs["9"]["images"][0]["filename"], "out.png");
        assert!(record.messages.is_empty());
    }

    #[test]
    fn history_error_entry_keeps_messages() {
        let body = json!({
            "p-1": {
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "messages": [["execution_error", {"exception_message": "OOM"}]],
                },
            }
        });
        let record = parse_history(&body, "p-1").unwrap();

        assert_eq!(record.status, HistoryStatus::Error);
        assert_eq!(record.messages.len(), 1);
    }

    #[test]
    fn history_without_entry_is_none() {
        assert!(parse_history(&json!({}), "p-1").is_none());
        assert!(parse_history(&json!({"other": {}}), "p-1").is_none());
    }

    #[test]
    fn history_without_status_is_unknown() {
        let record = parse_history(&json!({"p-1": {"outputs": {}}}), "p-1").unwrap();
        assert_eq!(record.status, HistoryStatus::Unknown);
    }

    fn offline_directory() -> ComfyUIDirectory {
        let api = ComfyUIApi::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        ComfyUIDirectory::new(api)
    }

    #[tokio::test]
    async fn execution_start_updates_processing_hint() {
        let directory = offline_directory();
        assert_eq!(directory.current_processing_id().await.unwrap(), None);

        directory
            .handle_event("execution_start", &json!({"prompt_id": "p-7"}))
            .await;
        directory
            .handle_event("executing", &json!({"prompt_id": "p-8", "node": "1"}))
            .await;

        assert_eq!(
            directory.current_processing_id().await.unwrap().as_deref(),
            Some("p-7")
        );
    }

    #[tokio::test]
    async fn unreachable_engine_is_directory_unavailable() {
        let directory = offline_directory();
        assert_matches!(
            directory.list_queue().await,
            Err(CoreError::DirectoryUnavailable(_))
        );
        assert_matches!(
            directory.get_history("p-1").await,
            Err(CoreError::DirectoryUnavailable(_))
        );
    }
}
