//! Lifecycle events emitted by the execution engine.
//!
//! The engine delivers each event as a kind string plus a JSON payload
//! (`{"type": "executing", "data": {"node": "3", "prompt_id": "..."}}`).
//! [`LifecycleEvent::from_parts`] turns that pair into a typed enum.
//!
//! Parsing is lenient: every payload field is optional, a `null` payload
//! is an empty one, node ids may be JSON strings or integers, and counters
//! accept any JSON number (fractions are truncated). A field of the wrong
//! JSON type is treated as absent so the rest of the event still applies.
//! Only a payload that is not an object, or an `executing` whose `node`
//! cannot be read, makes the event malformed.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::CoreError;
use crate::types::{NodeId, PromptId};

pub const EVENT_STATUS: &str = "status";
pub const EVENT_EXECUTION_START: &str = "execution_start";
pub const EVENT_EXECUTING: &str = "executing";
pub const EVENT_EXECUTION_CACHED: &str = "execution_cached";
pub const EVENT_PROGRESS: &str = "progress";
pub const EVENT_EXECUTED: &str = "executed";
pub const EVENT_EXECUTION_ERROR: &str = "execution_error";

/// Receives every lifecycle event delivered by an event source.
///
/// Implementations must not fail: whatever goes wrong while handling one
/// event is theirs to log and absorb.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, kind: &str, payload: &Value);
}

/// One lifecycle event, by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Queue summary broadcast.
    Status(StatusData),
    /// An execution has been picked up by the engine.
    ExecutionStart(ExecutionStartData),
    /// A node started, or (with no node) the execution stopped dispatching.
    Executing(ExecutingData),
    /// Nodes whose outputs were served from cache.
    ExecutionCached(ExecutionCachedData),
    /// Step-level progress inside the running node.
    Progress(ProgressData),
    /// A node produced output.
    Executed(ExecutedData),
    /// The execution failed.
    ExecutionError(ErrorData),
    /// Any other kind. Always ignored.
    Unknown(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusData {
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<QueueStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueStatus {
    #[serde(deserialize_with = "lenient_or_default")]
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecInfo {
    #[serde(deserialize_with = "lenient_count")]
    pub queue_remaining: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionStartData {
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_id: Option<PromptId>,
}

/// `node == None` is the "execution finished dispatching" sentinel, so a
/// `node` of any other JSON type makes the event malformed instead of
/// being read as that sentinel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutingData {
    #[serde(default, deserialize_with = "strict_node_id")]
    pub node: Option<NodeId>,
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_id: Option<PromptId>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionCachedData {
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_id: Option<PromptId>,
    #[serde(default, deserialize_with = "node_id_list")]
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressData {
    #[serde(default, deserialize_with = "lenient_count")]
    pub value: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub max: Option<i64>,
    #[serde(default, deserialize_with = "optional_node_id")]
    pub node: Option<NodeId>,
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_id: Option<PromptId>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutedData {
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_id: Option<PromptId>,
    #[serde(default, deserialize_with = "optional_node_id")]
    pub node: Option<NodeId>,
    #[serde(default)]
    pub output: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorData {
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_id: Option<PromptId>,
    #[serde(default, deserialize_with = "optional_node_id")]
    pub node_id: Option<NodeId>,
    #[serde(default, deserialize_with = "lenient")]
    pub exception_message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub exception_type: Option<String>,
}

impl LifecycleEvent {
    /// Parse a `(kind, payload)` pair delivered by the event source.
    pub fn from_parts(kind: &str, payload: &Value) -> Result<Self, CoreError> {
        let event = match kind {
            EVENT_STATUS => Self::Status(parse_payload(kind, payload)?),
            EVENT_EXECUTION_START => Self::ExecutionStart(parse_payload(kind, payload)?),
            EVENT_EXECUTING => Self::Executing(parse_payload(kind, payload)?),
            EVENT_EXECUTION_CACHED => Self::ExecutionCached(parse_payload(kind, payload)?),
            EVENT_PROGRESS => Self::Progress(parse_payload(kind, payload)?),
            EVENT_EXECUTED => Self::Executed(parse_payload(kind, payload)?),
            EVENT_EXECUTION_ERROR => Self::ExecutionError(parse_payload(kind, payload)?),
            other => Self::Unknown(other.to_owned()),
        };
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Status(_) => EVENT_STATUS,
            Self::ExecutionStart(_) => EVENT_EXECUTION_START,
            Self::Executing(_) => EVENT_EXECUTING,
            Self::ExecutionCached(_) => EVENT_EXECUTION_CACHED,
            Self::Progress(_) => EVENT_PROGRESS,
            Self::Executed(_) => EVENT_EXECUTED,
            Self::ExecutionError(_) => EVENT_EXECUTION_ERROR,
            Self::Unknown(kind) => kind,
        }
    }

    /// Whether folding this event needs the engine's current queue.
    pub fn needs_queue(&self) -> bool {
        match self {
            Self::Status(data) => data.status.is_some(),
            Self::ExecutionStart(data) => data.prompt_id.is_some(),
            _ => false,
        }
    }
}

fn parse_payload<T: DeserializeOwned + Default>(kind: &str, payload: &Value) -> Result<T, CoreError> {
    match payload {
        Value::Null => Ok(T::default()),
        Value::Object(_) => T::deserialize(payload).map_err(|source| CoreError::MalformedEvent {
            kind: kind.to_owned(),
            source,
        }),
        _ => Err(CoreError::MalformedEvent {
            kind: kind.to_owned(),
            source: serde::de::Error::custom("payload is not a JSON object"),
        }),
    }
}

/// Deserialize an optional field, treating a value of the wrong type as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(T::deserialize(Value::deserialize(deserializer)?).ok())
}

fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Any JSON number, truncated toward zero.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    })
}

/// ComfyUI sends node ids as strings, older builds and some custom nodes
/// as integers.
fn node_id_from_value(value: &Value) -> Option<NodeId> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn optional_node_id<'de, D>(deserializer: D) -> Result<Option<NodeId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(node_id_from_value(&Value::deserialize(deserializer)?))
}

fn strict_node_id<'de, D>(deserializer: D) -> Result<Option<NodeId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => node_id_from_value(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid node id: {value}"))),
    }
}

fn node_id_list<'de, D>(deserializer: D) -> Result<Vec<NodeId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().filter_map(node_id_from_value).collect(),
        _ => Vec::new(),
    })
}
