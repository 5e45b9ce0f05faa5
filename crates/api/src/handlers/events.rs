//! Handler for the lifecycle event ingress.
//!
//! ComfyUI only broadcasts `status` to every WebSocket client. The
//! per-execution events go to the submitting client alone, so a forwarder
//! running inside the ComfyUI process posts each `(type, data)` pair here.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use taskmon_comfyui::messages::ComfyUIMessage;
use taskmon_core::events::EventHandler;

use crate::state::AppState;

/// Header carrying the shared ingress token, when one is configured.
pub const EVENTS_TOKEN_HEADER: &str = "x-task-monitor-token";

/// POST /task_monitor/events
///
/// Dispatches the event to the same handlers the WebSocket source feeds.
/// Answers 204 once every handler has seen it, or 401 when a token is
/// configured and the request does not carry it.
pub async fn post_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(message): Json<ComfyUIMessage>,
) -> StatusCode {
    if let Some(expected) = state.config.events_token.as_deref() {
        let presented = headers
            .get(EVENTS_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected) {
            tracing::warn!(event_kind = %message.kind, "Rejected event without a valid token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    tracing::trace!(event_kind = %message.kind, "Event received over HTTP");
    state.events.handle_event(&message.kind, &message.data).await;
    StatusCode::NO_CONTENT
}
