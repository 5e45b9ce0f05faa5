//! The status document served by `GET /task_monitor/status`.
//!
//! [`render`] combines the engine's authoritative queue/history answer with
//! a [`TrackerView`] copied out of the aggregate. It is pure: all lookups
//! happen before it is called.

use serde::Serialize;
use serde_json::Value;

use crate::directory::{ExecutionRecord, HistoryRecord, HistoryStatus, QueueState};
use crate::progress::TrackerView;
use crate::types::{NodeId, PromptId, Timestamp};

/// Overall state of the execution being reported on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Queued,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub task_id: Option<PromptId>,
    pub status: TaskStatus,
    pub queue: QueueSummary,
    pub current_task_progress: Option<TaskProgress>,
    pub current_task_outputs: Option<TaskOutputs>,
    pub error_info: Option<Vec<Value>>,
    pub workflow_progress: WorkflowProgress,
    /// Seconds.
    pub execution_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueSummary {
    pub running_count: usize,
    pub pending_count: usize,
    pub running: Vec<QueueEntry>,
    pub pending: Vec<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub prompt_id: PromptId,
    pub nodes_in_prompt: usize,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub node_id: Option<NodeId>,
    pub node_type: Option<String>,
    pub step: i64,
    pub total_steps: i64,
    pub text_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutputs {
    pub prompt_id: PromptId,
    pub outputs: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowProgress {
    pub total_nodes: usize,
    pub executed_nodes: usize,
    pub last_executed_node_id: Option<NodeId>,
}

/// Outcome of the history lookup for the reported execution.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryLookup {
    Found(HistoryRecord),
    Missing,
    /// The directory could not be asked. Reported as `idle`.
    Failed,
}

impl StatusSnapshot {
    /// The document served when the engine cannot be reached at all.
    pub fn idle() -> Self {
        Self {
            task_id: None,
            status: TaskStatus::Idle,
            queue: QueueSummary::default(),
            current_task_progress: None,
            current_task_outputs: None,
            error_info: None,
            workflow_progress: WorkflowProgress::default(),
            execution_time: 0.0,
        }
    }
}

impl QueueSummary {
    pub fn from_queue(queue: &QueueState) -> Self {
        Self {
            running_count: queue.running.len(),
            pending_count: queue.pending.len(),
            running: queue.running.iter().map(QueueEntry::from_record).collect(),
            pending: queue.pending.iter().map(QueueEntry::from_record).collect(),
        }
    }
}

impl QueueEntry {
    fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            prompt_id: record.prompt_id.clone(),
            nodes_in_prompt: record.graph.len(),
            client_id: record.client_id.clone(),
        }
    }
}

/// Classify and assemble the status document.
///
/// Checked in order: history success → `completed`, history error →
/// `error`, running → `running`, pending → `queued`, otherwise `idle`.
pub fn render(
    view: &TrackerView,
    queue: &QueueState,
    task_id: Option<PromptId>,
    history: HistoryLookup,
    now: Timestamp,
) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot {
        task_id: task_id.clone(),
        status: TaskStatus::Idle,
        queue: QueueSummary::from_queue(queue),
        current_task_progress: None,
        current_task_outputs: None,
        error_info: None,
        workflow_progress: WorkflowProgress {
            total_nodes: view.total_node_count,
            executed_nodes: view.executed_node_count,
            last_executed_node_id: view.last_executed_node_id.clone(),
        },
        execution_time: view.elapsed_secs(now),
    };

    let Some(task_id) = task_id else {
        return snapshot;
    };

    match history {
        HistoryLookup::Found(record) => match record.status {
            HistoryStatus::Success => {
                snapshot.status = TaskStatus::Completed;
                snapshot.current_task_outputs = Some(TaskOutputs {
                    prompt_id: task_id,
                    outputs: record.outputs,
                });
            }
            HistoryStatus::Error => {
                snapshot.status = TaskStatus::Error;
                snapshot.error_info = Some(error_messages(record.messages, view));
            }
            HistoryStatus::Unknown => {}
        },
        HistoryLookup::Failed => {}
        HistoryLookup::Missing => {
            if queue.is_running(&task_id) {
                snapshot.status = TaskStatus::Running;
                snapshot.current_task_progress = Some(TaskProgress {
                    node_id: view.current_node_id.clone(),
                    node_type: view.current_node_kind.clone(),
                    step: view.progress_value,
                    total_steps: view.progress_max,
                    text_message: view.last_error_message.clone(),
                });
                if view.prompt_id.as_deref() == Some(task_id.as_str()) {
                    snapshot.current_task_outputs =
                        view.cached_outputs.clone().map(|outputs| TaskOutputs {
                            prompt_id: task_id.clone(),
                            outputs: Value::Object(outputs),
                        });
                }
            } else if queue.is_pending(&task_id) {
                snapshot.status = TaskStatus::Queued;
            }
        }
    }

    snapshot
}

fn error_messages(messages: Vec<Value>, view: &TrackerView) -> Vec<Value> {
    if !messages.is_empty() {
        return messages;
    }
    view.last_error_message
        .iter()
        .map(|m| Value::String(m.clone()))
        .collect()
}
