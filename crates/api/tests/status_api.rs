//! Integration tests for `GET /task_monitor/status` and the static assets
//! served next to it.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, body_text, get, TestApp};
use serde_json::json;

use taskmon_core::directory::{ExecutionRecord, HistoryRecord, QueueState};
use taskmon_core::workflow::ExecutionGraph;

fn sample_graph() -> ExecutionGraph {
    ExecutionGraph::from_value(&json!({
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {}},
        "3": {"class_type": "KSampler", "inputs": {}},
        "8": {"class_type": "VAEDecode", "inputs": {}},
        "9": {"class_type": "SaveImage", "inputs": {}},
        "12": {"class_type": "TaskMonitorNode", "inputs": {}},
    }))
}

async fn start_running(app: &TestApp, prompt_id: &str) {
    app.directory
        .set_queue(QueueState {
            running: vec![ExecutionRecord::new(prompt_id, sample_graph()).with_client_id("web")],
            pending: vec![ExecutionRecord::new("next", sample_graph())],
        })
        .await;
    app.directory.set_processing(Some(prompt_id.to_owned())).await;
    app.tracker
        .fold("execution_start", &json!({"prompt_id": prompt_id}))
        .await;
}

// ---------------------------------------------------------------------------
// Test: idle engine reports idle with an empty queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_engine_reports_idle() {
    let app = common::build_test_app();
    let response = get(&app, "/task_monitor/status").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "idle");
    assert_eq!(json["task_id"], serde_json::Value::Null);
    assert_eq!(json["queue"]["running_count"], 0);
    assert_eq!(json["workflow_progress"]["total_nodes"], 0);
    assert_eq!(json["execution_time"], 0.0);
}

// ---------------------------------------------------------------------------
// Test: running execution reports node, steps, counts and live time
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_execution_reports_progress() {
    let app = common::build_test_app();
    start_running(&app, "p-1").await;

    app.tracker
        .fold("execution_cached", &json!({"prompt_id": "p-1", "nodes": ["4"]}))
        .await;
    app.tracker
        .fold("executing", &json!({"prompt_id": "p-1", "node": "3"}))
        .await;
    app.tracker
        .fold("progress", &json!({"value": 12, "max": 20, "node": "3", "prompt_id": "p-1"}))
        .await;
    app.clock.advance(Duration::from_millis(2500));

    let json = body_json(get(&app, "/task_monitor/status").await).await;

    assert_eq!(json["status"], "running");
    assert_eq!(json["task_id"], "p-1");
    assert_eq!(json["queue"]["running_count"], 1);
    assert_eq!(json["queue"]["pending_count"], 1);
    assert_eq!(json["queue"]["running"][0]["nodes_in_prompt"], 5);
    assert_eq!(json["queue"]["running"][0]["client_id"], "web");
    assert_eq!(
        json["current_task_progress"],
        json!({
            "node_id": "3",
            "node_type": "KSampler",
            "step": 12,
            "total_steps": 20,
            "text_message": null,
        })
    );
    assert_eq!(
        json["workflow_progress"],
        json!({"total_nodes": 4, "executed_nodes": 2, "last_executed_node_id": "3"})
    );
    assert_eq!(json["execution_time"], 2.5);
}

// ---------------------------------------------------------------------------
// Test: finished execution reports history outputs and frozen time
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_execution_reports_outputs() {
    let app = common::build_test_app();
    start_running(&app, "p-2").await;

    app.tracker
        .fold("executing", &json!({"prompt_id": "p-2", "node": null}))
        .await;
    app.clock.advance(Duration::from_secs(4));
    app.tracker.fold("executed", &json!({"prompt_id": "p-2"})).await;
    app.clock.advance(Duration::from_secs(30));

    app.directory.set_queue(QueueState::default()).await;
    app.directory
        .insert_history(
            "p-2",
            HistoryRecord::success(json!({"9": {"images": [{"filename": "out.png"}]}})),
        )
        .await;

    let json = body_json(get(&app, "/task_monitor/status").await).await;

    assert_eq!(json["status"], "completed");
    assert_eq!(json["current_task_outputs"]["prompt_id"], "p-2");
    assert_eq!(
        json["current_task_outputs"]["outputs"]["9"]["images"][0]["filename"],
        "out.png"
    );
    assert_eq!(json["workflow_progress"]["executed_nodes"], 4);
    assert_eq!(json["execution_time"], 4.0);
}

// ---------------------------------------------------------------------------
// Test: failed execution reports error details
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_execution_reports_error_info() {
    let app = common::build_test_app();
    start_running(&app, "p-3").await;
    app.tracker
        .fold(
            "execution_error",
            &json!({"prompt_id": "p-3", "node_id": "3", "exception_message": "CUDA out of memory"}),
        )
        .await;

    app.directory.set_queue(QueueState::default()).await;
    app.directory
        .insert_history("p-3", HistoryRecord::error(Vec::new()))
        .await;

    let json = body_json(get(&app, "/task_monitor/status").await).await;

    assert_eq!(json["status"], "error");
    assert_eq!(json["error_info"], json!(["CUDA out of memory"]));
}

// ---------------------------------------------------------------------------
// Test: pending execution is reported as queued
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_execution_is_queued() {
    let app = common::build_test_app();
    app.directory
        .set_queue(QueueState {
            running: Vec::new(),
            pending: vec![ExecutionRecord::new("waiting", sample_graph())],
        })
        .await;
    app.directory.set_processing(Some("waiting".into())).await;

    let json = body_json(get(&app, "/task_monitor/status").await).await;

    assert_eq!(json["status"], "queued");
    assert_eq!(json["task_id"], "waiting");
    assert_eq!(json["current_task_progress"], serde_json::Value::Null);
}

// ---------------------------------------------------------------------------
// Test: unreachable engine still answers 200 with an idle document
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unavailable_engine_degrades_to_idle() {
    let app = common::build_test_app();
    start_running(&app, "p-4").await;
    app.directory.set_available(false).await;

    let response = get(&app, "/task_monitor/status").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "idle");
    assert_eq!(json["queue"]["running_count"], 0);
}

// ---------------------------------------------------------------------------
// Test: static assets are served under /task_monitor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn static_assets_are_served() {
    let app = common::build_test_app();

    let response = get(&app, "/task_monitor/monitor.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("task monitor"));

    let response = get(&app, "/task_monitor/missing.js").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
