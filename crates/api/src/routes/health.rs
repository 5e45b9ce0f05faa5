use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    /// `ok` while ComfyUI is connected, `degraded` otherwise.
    status: &'static str,
    version: &'static str,
    comfyui_connected: bool,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = *state.comfyui_connected.borrow();
    Json(HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        comfyui_connected: connected,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
