//! Handler for the task status endpoint.

use axum::extract::State;
use axum::Json;

use taskmon_core::status::StatusSnapshot;

use crate::state::AppState;

/// GET /task_monitor/status
///
/// Always answers 200: engine lookup failures degrade the document
/// instead of failing the request.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    let snapshot = state.tracker.snapshot().await;
    tracing::debug!(
        task_id = snapshot.task_id.as_deref().unwrap_or("-"),
        status = ?snapshot.status,
        "Status requested",
    );
    Json(snapshot)
}
