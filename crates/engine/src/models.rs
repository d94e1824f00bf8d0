//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory.  The hosting application stores them as JSON and hands them to
//! the executor; the engine never mutates a definition.

use blocks::condition::resolve_path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Port name that selects a node's whole output.
pub const DEFAULT_PORT: &str = "out";

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Maps to a registered block type.
    #[serde(rename = "type", alias = "node_type")]
    pub node_type: String,
    /// Block-specific configuration passed at execution time.
    #[serde(default)]
    pub config: Value,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config,
        }
    }
}

// ---------------------------------------------------------------------------
// EdgeAdapter
// ---------------------------------------------------------------------------

/// Transform applied to an edge's payload before it is merged into the
/// target node's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeAdapter {
    /// Extract the value at a dotted path (`null` if absent).
    Pick { path: String },
    /// Nest the payload under `key`.
    Wrap { key: String },
    /// Rename a top-level key.
    Rename { from: String, to: String },
    /// Remove top-level keys.
    Drop { keys: Vec<String> },
}

impl EdgeAdapter {
    pub fn apply(&self, payload: Value) -> Value {
        match self {
            EdgeAdapter::Pick { path } => resolve_path(&payload, path).cloned().unwrap_or(Value::Null),
            EdgeAdapter::Wrap { key } => {
                let mut map = Map::new();
                map.insert(key.clone(), payload);
                Value::Object(map)
            }
            EdgeAdapter::Rename { from, to } => match payload {
                Value::Object(mut map) => {
                    if let Some(v) = map.remove(from) {
                        map.insert(to.clone(), v);
                    }
                    Value::Object(map)
                }
                other => other,
            },
            EdgeAdapter::Drop { keys } => match payload {
                Value::Object(mut map) => {
                    for key in keys {
                        map.remove(key);
                    }
                    Value::Object(map)
                }
                other => other,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// EdgeDefinition
// ---------------------------------------------------------------------------

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

/// Directed data-flow link from one node's output to another's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
    #[serde(default = "default_port", alias = "source_port")]
    pub source_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<EdgeAdapter>,
}

impl EdgeDefinition {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_port: default_port(),
            adapter: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn from_port(mut self, port: impl Into<String>) -> Self {
        self.source_port = port.into();
        self
    }

    pub fn with_adapter(mut self, adapter: EdgeAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}->{}", self.source, self.target),
        }
    }

    /// The payload this edge carries given the source node's output.
    ///
    /// `None` when the selected port is absent from the output.
    pub fn payload(&self, source_output: &Value) -> Option<Value> {
        let selected = if self.source_port == DEFAULT_PORT {
            source_output.clone()
        } else {
            source_output.get(&self.source_port)?.clone()
        };
        Some(match &self.adapter {
            Some(adapter) => adapter.apply(selected),
            None => selected,
        })
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<NodeDefinition>, edges: Vec<EdgeDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            edges,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges targeting `node_id`, in declaration order.
    pub fn incoming(&self, node_id: &str) -> Vec<&EdgeDefinition> {
        self.edges.iter().filter(|e| e.target == node_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_caller_supplied_definition() {
        let wf: Workflow = serde_json::from_value(json!({
            "nodes": [
                { "id": "n1", "type": "echo" },
                { "id": "n2", "type": "filter", "config": { "x": 1 } }
            ],
            "edges": [
                { "id": "e1", "source": "n1", "target": "n2", "sourcePort": "true",
                  "adapter": { "type": "wrap", "key": "payload" } },
                { "from": "n1", "to": "n2" }
            ]
        }))
        .unwrap();

        assert_eq!(wf.nodes[0].config, Value::Null);
        assert_eq!(wf.edges[0].source_port, "true");
        assert_eq!(wf.edges[1].source_port, DEFAULT_PORT);
        assert_eq!(wf.edges[1].label(), "n1->n2");
        assert_eq!(wf.incoming("n2").len(), 2);
    }

    #[test]
    fn payload_selects_port_then_adapts() {
        let output = json!({ "true": { "a": 1, "b": 2 } });
        let edge = EdgeDefinition::new("x", "y")
            .from_port("true")
            .with_adapter(EdgeAdapter::Rename { from: "a".into(), to: "z".into() });
        assert_eq!(edge.payload(&output), Some(json!({ "z": 1, "b": 2 })));

        let other_port = EdgeDefinition::new("x", "y").from_port("false");
        assert_eq!(other_port.payload(&output), None);
    }

    #[test]
    fn adapters_transform_payloads() {
        let payload = json!({ "company": { "name": "Acme" }, "tmp": 1 });
        assert_eq!(
            EdgeAdapter::Pick { path: "company.name".into() }.apply(payload.clone()),
            json!("Acme")
        );
        assert_eq!(
            EdgeAdapter::Wrap { key: "w".into() }.apply(json!(1)),
            json!({ "w": 1 })
        );
        assert_eq!(
            EdgeAdapter::Drop { keys: vec!["tmp".into()] }.apply(payload),
            json!({ "company": { "name": "Acme" } })
        );
    }
}
