use std::sync::Arc;

use tokio::sync::watch;

use taskmon_core::events::EventHandler;
use taskmon_core::tracker::ProgressTracker;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc` or is a `watch` receiver.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Execution progress fed by the ComfyUI event source and the ingress.
    pub tracker: Arc<ProgressTracker>,
    /// Handlers fed by the event ingress, the same set the WebSocket source feeds.
    pub events: Arc<dyn EventHandler>,
    /// Whether the event source currently holds a live WebSocket.
    pub comfyui_connected: watch::Receiver<bool>,
}
