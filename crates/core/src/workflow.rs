//! Workflow graphs as submitted to the execution engine.
//!
//! A ComfyUI prompt graph is a JSON object keyed by node id, where each
//! value carries the operator name in `class_type`:
//!
//! ```json
//! {"1": {"class_type": "CheckpointLoader", "inputs": {...}},
//!  "2": {"class_type": "KSampler", "inputs": {...}}}
//! ```
//!
//! Only the node ids and their kinds matter for progress tracking.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::NodeId;

/// Kind of the monitoring node itself. Nodes of this kind are not work.
pub const DEFAULT_MONITOR_NODE_KIND: &str = "TaskMonitorNode";

/// The parts of a graph node the tracker reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Operator / class name (`class_type`), if the node declares one.
    pub kind: Option<String>,
}

/// Immutable node graph of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionGraph {
    nodes: BTreeMap<NodeId, NodeDescriptor>,
}

impl ExecutionGraph {
    /// Read a graph from the engine's JSON representation.
    ///
    /// Anything that is not an object yields an empty graph; node values
    /// that are not objects are kept with no kind.
    pub fn from_value(value: &Value) -> Self {
        let nodes = value
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(id, node)| {
                        let kind = node
                            .get("class_type")
                            .and_then(Value::as_str)
                            .map(str::to_owned);
                        (id.clone(), NodeDescriptor { kind })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { nodes }
    }

    /// Build a graph from `(node_id, kind)` pairs.
    pub fn from_nodes<I, K, V>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<NodeId>,
        V: Into<String>,
    {
        Self {
            nodes: nodes
                .into_iter()
                .map(|(id, kind)| {
                    (
                        id.into(),
                        NodeDescriptor {
                            kind: Some(kind.into()),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Number of entries in the graph, monitoring node included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&NodeDescriptor> {
        self.nodes.get(id)
    }

    /// Whether `id` names a node that counts as work: a numeric id whose
    /// kind is not the monitoring kind.
    pub fn is_eligible(&self, id: &str, monitor_kind: &str) -> bool {
        is_numeric_id(id)
            && self
                .nodes
                .get(id)
                .is_some_and(|node| node.kind.as_deref() != Some(monitor_kind))
    }

    pub fn eligible_node_ids<'a>(
        &'a self,
        monitor_kind: &'a str,
    ) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.nodes
            .iter()
            .filter(move |(id, node)| {
                is_numeric_id(id) && node.kind.as_deref() != Some(monitor_kind)
            })
            .map(|(id, _)| id)
    }

    pub fn eligible_count(&self, monitor_kind: &str) -> usize {
        self.eligible_node_ids(monitor_kind).count()
    }
}

fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}
