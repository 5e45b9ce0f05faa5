pub mod health;

use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;

use crate::handlers;
use crate::state::AppState;

/// Build the `/task_monitor` route tree.
///
/// ```text
/// GET  /status     current execution status
/// POST /events     lifecycle event ingress
/// GET  /*          static assets from `web_dir`
/// ```
pub fn task_monitor_routes(web_dir: &str) -> Router<AppState> {
    Router::new()
        .route("/status", get(handlers::status::get_status))
        .route("/events", post(handlers::events::post_event))
        .fallback_service(ServeDir::new(web_dir))
}
