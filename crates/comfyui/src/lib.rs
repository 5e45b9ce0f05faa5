//! ComfyUI integration for the task monitor.
//!
//! Connects to a ComfyUI server over WebSocket to receive lifecycle
//! events, and wraps its REST API as an
//! [`ExecutionDirectory`](taskmon_core::directory::ExecutionDirectory).

pub mod api;
pub mod client;
pub mod directory;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod source;
