//! The tracked execution aggregate and its event-folding rules.
//!
//! [`TrackedExecution`] is plain data with synchronous methods. It knows
//! nothing about locks or I/O: the caller resolves any queue lookup first
//! and passes the answer to [`TrackedExecution::apply`] together with the
//! current time. See [`crate::tracker::ProgressTracker`] for the shared,
//! lock-guarded wrapper.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::directory::{ExecutionRecord, QueueState};
use crate::events::{
    ErrorData, ExecutedData, ExecutingData, ExecutionCachedData, ExecutionStartData,
    LifecycleEvent, ProgressData, StatusData,
};
use crate::types::{elapsed_secs, NodeId, PromptId, Timestamp};
use crate::workflow::ExecutionGraph;

/// Recorded when an `execution_error` carries no message.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Progress of the execution currently being observed.
///
/// Identity changes go through [`adopt`](Self::adopt), which clears every
/// derived field before installing the new id and graph.
#[derive(Debug, Clone)]
pub struct TrackedExecution {
    monitor_kind: String,
    prompt_id: Option<PromptId>,
    graph: Option<Arc<ExecutionGraph>>,
    total_node_count: usize,
    executed_node_ids: BTreeSet<NodeId>,
    last_executed_node_id: Option<NodeId>,
    current_node_id: Option<NodeId>,
    current_node_kind: Option<String>,
    progress_value: i64,
    progress_max: i64,
    started_at: Option<Timestamp>,
    accumulated_duration: f64,
    last_error_message: Option<String>,
    /// Node outputs seen via `executed`, per execution.
    output_cache: HashMap<PromptId, Map<String, Value>>,
}

/// Copy of the aggregate fields the status document is rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerView {
    pub prompt_id: Option<PromptId>,
    pub total_node_count: usize,
    pub executed_node_count: usize,
    pub last_executed_node_id: Option<NodeId>,
    pub current_node_id: Option<NodeId>,
    pub current_node_kind: Option<String>,
    pub progress_value: i64,
    pub progress_max: i64,
    pub started_at: Option<Timestamp>,
    pub accumulated_duration: f64,
    pub last_error_message: Option<String>,
    /// Outputs cached for `prompt_id`, if any were seen.
    pub cached_outputs: Option<Map<String, Value>>,
}

impl TrackerView {
    /// Live clock while running, otherwise the last completed run's duration.
    pub fn elapsed_secs(&self, now: Timestamp) -> f64 {
        match self.started_at {
            Some(started_at) => elapsed_secs(started_at, now),
            None => self.accumulated_duration,
        }
    }
}

impl TrackedExecution {
    /// An idle aggregate that excludes nodes of `monitor_kind` from counts.
    pub fn new(monitor_kind: impl Into<String>) -> Self {
        Self {
            monitor_kind: monitor_kind.into(),
            prompt_id: None,
            graph: None,
            total_node_count: 0,
            executed_node_ids: BTreeSet::new(),
            last_executed_node_id: None,
            current_node_id: None,
            current_node_kind: None,
            progress_value: 0,
            progress_max: 0,
            started_at: None,
            accumulated_duration: 0.0,
            last_error_message: None,
            output_cache: HashMap::new(),
        }
    }

    pub fn prompt_id(&self) -> Option<&str> {
        self.prompt_id.as_deref()
    }

    pub fn graph(&self) -> Option<&Arc<ExecutionGraph>> {
        self.graph.as_ref()
    }

    pub fn total_node_count(&self) -> usize {
        self.total_node_count
    }

    pub fn executed_node_ids(&self) -> &BTreeSet<NodeId> {
        &self.executed_node_ids
    }

    pub fn current_node(&self) -> (Option<&str>, Option<&str>) {
        (
            self.current_node_id.as_deref(),
            self.current_node_kind.as_deref(),
        )
    }

    pub fn progress(&self) -> (i64, i64) {
        (self.progress_value, self.progress_max)
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    pub fn accumulated_duration(&self) -> f64 {
        self.accumulated_duration
    }

    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error_message.as_deref()
    }

    pub fn view(&self) -> TrackerView {
        TrackerView {
            prompt_id: self.prompt_id.clone(),
            total_node_count: self.total_node_count,
            executed_node_count: self.executed_node_ids.len(),
            last_executed_node_id: self.last_executed_node_id.clone(),
            current_node_id: self.current_node_id.clone(),
            current_node_kind: self.current_node_kind.clone(),
            progress_value: self.progress_value,
            progress_max: self.progress_max,
            started_at: self.started_at,
            accumulated_duration: self.accumulated_duration,
            last_error_message: self.last_error_message.clone(),
            cached_outputs: self
                .prompt_id
                .as_ref()
                .and_then(|id| self.output_cache.get(id))
                .filter(|outputs| !outputs.is_empty())
                .cloned(),
        }
    }

    /// Fold one event. `queue` is the engine's queue as looked up for this
    /// event (only consulted by `status` and `execution_start`).
    pub fn apply(&mut self, event: &LifecycleEvent, queue: Option<&QueueState>, now: Timestamp) {
        match event {
            LifecycleEvent::Status(data) => self.on_status(data, queue),
            LifecycleEvent::ExecutionStart(data) => self.on_execution_start(data, queue, now),
            LifecycleEvent::Executing(data) => self.on_executing(data),
            LifecycleEvent::ExecutionCached(data) => self.on_execution_cached(data),
            LifecycleEvent::Progress(data) => self.on_progress(data),
            LifecycleEvent::Executed(data) => self.on_executed(data, now),
            LifecycleEvent::ExecutionError(data) => self.on_execution_error(data),
            LifecycleEvent::Unknown(_) => {}
        }
    }

    /// Switch to `prompt_id`, or fill in a graph that was missing.
    ///
    /// Returns `true` when the identity changed.
    pub fn adopt(&mut self, prompt_id: &str, graph: Option<Arc<ExecutionGraph>>) -> bool {
        if self.prompt_id.as_deref() != Some(prompt_id) {
            self.reset();
            self.prompt_id = Some(prompt_id.to_owned());
            if let Some(graph) = graph {
                self.install_graph(graph);
            }
            true
        } else {
            if self.graph.is_none() {
                if let Some(graph) = graph {
                    self.install_graph(graph);
                }
            }
            false
        }
    }

    /// Take the graph of some running execution when no total is known yet.
    ///
    /// Best effort: with several executions running, the size may belong to
    /// one other than the tracked id.
    pub fn backfill_graph(&mut self, graph: Arc<ExecutionGraph>) {
        if self.total_node_count == 0 && !graph.is_empty() {
            self.install_graph(graph);
        }
    }

    pub fn clear_cached_outputs(&mut self, prompt_id: &str) -> bool {
        self.output_cache.remove(prompt_id).is_some()
    }

    // ---- private helpers ----

    fn reset(&mut self) {
        self.graph = None;
        self.total_node_count = 0;
        self.executed_node_ids.clear();
        self.last_executed_node_id = None;
        self.current_node_id = None;
        self.current_node_kind = None;
        self.progress_value = 0;
        self.progress_max = 0;
        self.started_at = None;
        self.accumulated_duration = 0.0;
        self.last_error_message = None;
        self.output_cache.clear();
    }

    fn install_graph(&mut self, graph: Arc<ExecutionGraph>) {
        self.total_node_count = graph.eligible_count(&self.monitor_kind);
        self.graph = Some(graph);
    }

    fn is_tracked(&self, prompt_id: Option<&str>) -> bool {
        prompt_id.is_some() && prompt_id == self.prompt_id.as_deref()
    }

    fn eligible_graph(&self, node_id: &str) -> Option<&ExecutionGraph> {
        self.graph
            .as_deref()
            .filter(|graph| graph.is_eligible(node_id, &self.monitor_kind))
    }

    fn on_status(&mut self, data: &StatusData, queue: Option<&QueueState>) {
        if data.status.is_none() {
            return;
        }
        let Some(head) = queue.and_then(|q| q.running.first()) else {
            return;
        };
        self.adopt_record(head);
    }

    fn on_execution_start(
        &mut self,
        data: &ExecutionStartData,
        queue: Option<&QueueState>,
        now: Timestamp,
    ) {
        let Some(prompt_id) = data.prompt_id.as_deref() else {
            return;
        };
        let Some(record) = queue.and_then(|q| q.find_running(prompt_id)) else {
            tracing::debug!(prompt_id, "execution_start for an execution not in the running queue");
            return;
        };
        self.adopt_record(record);
        self.started_at = Some(now);
        self.accumulated_duration = 0.0;
    }

    fn adopt_record(&mut self, record: &ExecutionRecord) {
        if self.adopt(&record.prompt_id, Some(Arc::clone(&record.graph))) {
            tracing::info!(
                prompt_id = %record.prompt_id,
                total_nodes = self.total_node_count,
                "Tracking new execution",
            );
        }
    }

    fn on_executing(&mut self, data: &ExecutingData) {
        if !self.is_tracked(data.prompt_id.as_deref()) {
            return;
        }
        match data.node.as_deref() {
            Some(node_id) => {
                let Some(graph) = self.eligible_graph(node_id) else {
                    return;
                };
                let kind = graph.node(node_id).and_then(|n| n.kind.clone());
                self.current_node_id = Some(node_id.to_owned());
                self.current_node_kind = kind;
                self.last_executed_node_id = Some(node_id.to_owned());
                self.executed_node_ids.insert(node_id.to_owned());
            }
            None => {
                // Finished dispatching: every eligible node counts as executed,
                // including any whose own `executing` event was missed.
                if self.total_node_count == 0 {
                    return;
                }
                if let Some(graph) = self.graph.as_deref() {
                    self.executed_node_ids
                        .extend(graph.eligible_node_ids(&self.monitor_kind).cloned());
                }
            }
        }
    }

    fn on_execution_cached(&mut self, data: &ExecutionCachedData) {
        if !self.is_tracked(data.prompt_id.as_deref()) {
            return;
        }
        let Some(graph) = self.graph.as_deref() else {
            return;
        };
        let cached: Vec<NodeId> = data
            .nodes
            .iter()
            .filter(|id| graph.is_eligible(id, &self.monitor_kind))
            .cloned()
            .collect();
        self.executed_node_ids.extend(cached);
    }

    fn on_progress(&mut self, data: &ProgressData) {
        self.progress_value = data.value.unwrap_or(0);
        self.progress_max = data.max.unwrap_or(0);

        let Some(node_id) = data.node.as_deref() else {
            return;
        };
        if let Some(node) = self.graph.as_deref().and_then(|g| g.node(node_id)) {
            self.current_node_kind = node.kind.clone();
            self.current_node_id = Some(node_id.to_owned());
        }
    }

    /// Stops the clock of the tracked execution. An `executed` that names
    /// a different execution is ignored so it cannot freeze the tracked
    /// run's clock; one without a `prompt_id` applies to the tracked run.
    fn on_executed(&mut self, data: &ExecutedData, now: Timestamp) {
        if data.prompt_id.is_some() && !self.is_tracked(data.prompt_id.as_deref()) {
            return;
        }
        if let Some(started_at) = self.started_at.take() {
            self.accumulated_duration = elapsed_secs(started_at, now);
        }
        if let (Some(prompt_id), Some(node_id), Some(output)) =
            (self.prompt_id.as_ref(), data.node.as_ref(), data.output.as_ref())
        {
            self.output_cache
                .entry(prompt_id.clone())
                .or_default()
                .insert(node_id.clone(), output.clone());
        }
    }

    fn on_execution_error(&mut self, data: &ErrorData) {
        let message = data
            .exception_message
            .clone()
            .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_owned());
        tracing::warn!(
            prompt_id = data.prompt_id.as_deref().unwrap_or("-"),
            node_id = data.node_id.as_deref().unwrap_or("-"),
            error_type = data.exception_type.as_deref().unwrap_or("-"),
            error_message = %message,
            "Execution error reported",
        );
        self.last_error_message = Some(message);
    }
}
