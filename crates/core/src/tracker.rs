//! Shared progress tracker.
//!
//! [`ProgressTracker`] owns the single [`TrackedExecution`] of the process
//! behind one exclusive lock. Two kinds of callers use it concurrently:
//!
//! - the event source, through [`ProgressTracker::fold`] (or the
//!   [`EventHandler`] impl), once per lifecycle event;
//! - HTTP status queries, through [`ProgressTracker::snapshot`].
//!
//! Directory lookups are always made before the lock is taken, and the
//! lock is only held long enough to apply an event or copy a view.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::directory::ExecutionDirectory;
use crate::error::CoreError;
use crate::events::{EventHandler, LifecycleEvent};
use crate::progress::{TrackedExecution, TrackerView};
use crate::status::{self, HistoryLookup, StatusSnapshot, TaskStatus};
use crate::types::{Clock, SystemClock};

pub struct ProgressTracker {
    state: Mutex<TrackedExecution>,
    directory: Arc<dyn ExecutionDirectory>,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    /// Create an idle tracker that excludes `monitor_kind` nodes from counts.
    pub fn new(directory: Arc<dyn ExecutionDirectory>, monitor_kind: impl Into<String>) -> Self {
        Self::with_clock(directory, monitor_kind, Arc::new(SystemClock))
    }

    pub fn with_clock(
        directory: Arc<dyn ExecutionDirectory>,
        monitor_kind: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(TrackedExecution::new(monitor_kind)),
            directory,
            clock,
        }
    }

    /// Fold one lifecycle event into the aggregate.
    ///
    /// Never fails: malformed payloads and directory errors are logged with
    /// the event kind and the event is dropped, leaving the aggregate as it was.
    pub async fn fold(&self, kind: &str, payload: &Value) {
        if let Err(e) = self.try_fold(kind, payload).await {
            tracing::warn!(event_kind = kind, error = %e, "Dropped lifecycle event");
        }
    }

    /// Copy of the aggregate's current fields.
    pub async fn view(&self) -> TrackerView {
        self.state.lock().await.view()
    }

    /// Render the status document.
    ///
    /// Directory failures degrade the answer (to `idle` and zeroed counters
    /// when the queue itself is unavailable); they never fail the query.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let queue = match self.directory.list_queue().await {
            Ok(queue) => queue,
            Err(e) => {
                tracing::warn!(error = %e, "Queue lookup failed, reporting idle");
                return StatusSnapshot::idle();
            }
        };

        let processing = self
            .directory
            .current_processing_id()
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Processing id lookup failed");
                None
            });

        let view = {
            let mut state = self.state.lock().await;
            if state.total_node_count() == 0 {
                if let Some(head) = queue.running.first() {
                    state.backfill_graph(Arc::clone(&head.graph));
                }
            }
            state.view()
        };

        // Without an `execution_start` hint the tracked id still names the
        // execution whose history decides completed or error.
        let task_id = processing
            .or_else(|| queue.running.first().map(|r| r.prompt_id.clone()))
            .or_else(|| view.prompt_id.clone());

        let history = match task_id.as_deref() {
            Some(id) => match self.directory.get_history(id).await {
                Ok(Some(record)) => HistoryLookup::Found(record),
                Ok(None) => HistoryLookup::Missing,
                Err(e) => {
                    tracing::warn!(prompt_id = id, error = %e, "History lookup failed");
                    HistoryLookup::Failed
                }
            },
            None => HistoryLookup::Missing,
        };

        let snapshot = status::render(&view, &queue, task_id, history, self.clock.now());

        if snapshot.status == TaskStatus::Completed {
            if let Some(id) = snapshot.task_id.as_deref() {
                if self.state.lock().await.clear_cached_outputs(id) {
                    tracing::debug!(prompt_id = id, "Cleared cached outputs of completed execution");
                }
            }
        }

        snapshot
    }

    // ---- private helpers ----

    async fn try_fold(&self, kind: &str, payload: &Value) -> Result<(), CoreError> {
        let event = LifecycleEvent::from_parts(kind, payload)?;
        if let LifecycleEvent::Unknown(_) = event {
            tracing::trace!(event_kind = kind, "Ignoring event kind");
            return Ok(());
        }

        let queue = if event.needs_queue() {
            Some(self.directory.list_queue().await?)
        } else {
            None
        };

        let now = self.clock.now();
        self.state.lock().await.apply(&event, queue.as_ref(), now);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ProgressTracker {
    async fn handle_event(&self, kind: &str, payload: &Value) {
        self.fold(kind, payload).await;
    }
}
