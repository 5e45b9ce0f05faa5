#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::watch;
use tower::ServiceExt;

use taskmon_api::config::ServerConfig;
use taskmon_api::router::build_app_router;
use taskmon_api::state::AppState;
use taskmon_comfyui::source::HandlerSet;
use taskmon_core::directory::InMemoryDirectory;
use taskmon_core::tracker::ProgressTracker;
use taskmon_core::types::{Clock, ManualClock, SystemClock};
use taskmon_core::workflow::DEFAULT_MONITOR_NODE_KIND;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:8188".to_string()],
        request_timeout_secs: 30,
        comfyui_api_url: "http://127.0.0.1:1".to_string(),
        comfyui_ws_url: "ws://127.0.0.1:1".to_string(),
        comfyui_request_timeout_secs: 1,
        monitor_node_kind: DEFAULT_MONITOR_NODE_KIND.to_string(),
        web_dir: web_dir().to_string_lossy().into_owned(),
        reconnect_max_delay_secs: 1,
        events_token: None,
    }
}

/// Static asset directory shared by the integration tests.
pub fn web_dir() -> std::path::PathBuf {
    let dir = std::path::Path::new(env!("CARGO_TARGET_TMPDIR")).join("task_monitor_web");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("monitor.js"), "console.log('task monitor');\n").unwrap();
    dir
}

/// The router plus handles to drive the state behind it.
pub struct TestApp {
    pub router: Router,
    pub directory: Arc<InMemoryDirectory>,
    pub tracker: Arc<ProgressTracker>,
    pub clock: Arc<ManualClock>,
    pub connected: watch::Sender<bool>,
}

/// Build the full application router with all middleware layers, backed by
/// an in-memory directory and a manual clock.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let directory = Arc::new(InMemoryDirectory::new());
    let clock = Arc::new(ManualClock::new(SystemClock.now()));
    let tracker = Arc::new(ProgressTracker::with_clock(
        directory.clone(),
        config.monitor_node_kind.clone(),
        clock.clone(),
    ));
    let (connected, connected_rx) = watch::channel(false);

    let mut handlers = HandlerSet::default();
    handlers.register(directory.clone());
    handlers.register(tracker.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
        tracker: tracker.clone(),
        events: Arc::new(handlers),
        comfyui_connected: connected_rx,
    };

    TestApp {
        router: build_app_router(state, &config),
        directory,
        tracker,
        clock,
        connected,
    }
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

/// POST one `{"type", "data"}` event to the ingress.
pub async fn post_event(
    app: &TestApp,
    kind: &str,
    data: serde_json::Value,
    token: Option<&str>,
) -> Response<Body> {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri("/task_monitor/events")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header("x-task-monitor-token", token);
    }
    let body = serde_json::json!({"type": kind, "data": data}).to_string();
    app.router
        .clone()
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
