//! ComfyUI WebSocket frame envelope.
//!
//! ComfyUI sends JSON text frames with the shape
//! `{"type": "<kind>", "data": {...}}`. Only the envelope is decoded
//! here; payloads stay raw JSON and are typed by
//! [`LifecycleEvent`](taskmon_core::events::LifecycleEvent) on the
//! handler side, so frames of kinds the monitor does not know still
//! reach every handler.

use serde::Deserialize;
use serde_json::Value;

/// One decoded WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComfyUIMessage {
    /// Event kind (`status`, `executing`, `progress`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// Event payload. Missing `data` decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

/// Parse a ComfyUI WebSocket text frame.
///
/// Returns `Err` for malformed JSON or a frame without a string `type`.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}}}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg.kind, "status");
        assert_eq!(msg.data["status"]["exec_info"]["queue_remaining"], 3);
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg.kind, "executing");
        assert_eq!(msg.data, json!({"node": null, "prompt_id": "xyz"}));
    }

    #[test]
    fn parse_executed_message() {
        let json = r#"{"type":"executed","data":{"node":"9","output":{"images":[{"filename":"out.png"}]},"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg.kind, "executed");
        assert_eq!(msg.data["output"]["images"][0]["filename"], "out.png");
    }

    #[test]
    fn parse_unknown_type_is_kept() {
        let json = r#"{"type":"crystools.monitor","data":{"cpu_utilization":12}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg.kind, "crystools.monitor");
    }

    #[test]
    fn parse_missing_data_is_null() {
        let msg = parse_message(r#"{"type":"status"}"#).unwrap();
        assert!(msg.data.is_null());
    }

    #[test]
    fn parse_missing_type_returns_error() {
        assert!(parse_message(r#"{"data":{}}"#).is_err());
        assert!(parse_message(r#"{"type":7,"data":{}}"#).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }
}
