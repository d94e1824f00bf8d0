//! DAG validation and layering — run this before executing a workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Edge IDs, where given, must be unique.
//! 3. Every edge must reference valid node IDs (both `source` and `target`).
//! 4. The directed graph must be acyclic (topological sort must succeed).
//!
//! Layering is Kahn's algorithm run one frontier at a time: layer *k* holds
//! every node whose dependencies all sit in layers `< k`.  Within a layer
//! nodes keep their declaration order, so the result is deterministic.

use std::collections::{HashMap, HashSet};

use crate::{models::Workflow, EngineError};

/// Validate the workflow's DAG and return its execution layers.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::DuplicateEdgeId`] if two edges share an ID.
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn execution_layers(workflow: &Workflow) -> Result<Vec<Vec<String>>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node and edge IDs are unique
    // -----------------------------------------------------------------------
    let mut node_set: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !node_set.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    let mut edge_ids: HashSet<&str> = HashSet::new();
    for id in workflow.edges.iter().filter_map(|e| e.id.as_deref()) {
        if !edge_ids.insert(id) {
            return Err(EngineError::DuplicateEdgeId(id.to_owned()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        if !node_set.contains(edge.source.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                edge: edge.label(),
                node_id: edge.source.clone(),
                side: "source",
            });
        }
        if !node_set.contains(edge.target.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                edge: edge.label(),
                node_id: edge.target.clone(),
                side: "target",
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3. Layered topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), 0))
        .collect();

    for edge in &workflow.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
    }

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut frontier: Vec<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();
    let mut placed = 0;

    while !frontier.is_empty() {
        placed += frontier.len();
        let mut ready: HashSet<&str> = HashSet::new();
        for node_id in &frontier {
            for &next in adjacency.get(node_id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(next);
                    }
                }
            }
        }
        layers.push(frontier.iter().map(|id| (*id).to_owned()).collect());
        frontier = workflow
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| ready.contains(id))
            .collect();
    }

    // Anything never placed sits on (or behind) a cycle.
    if placed != workflow.nodes.len() {
        let stuck = workflow
            .nodes
            .iter()
            .filter(|n| in_degree[n.id.as_str()] > 0)
            .map(|n| n.id.clone())
            .collect();
        return Err(EngineError::CycleDetected(stuck));
    }

    Ok(layers)
}

/// Validate the workflow's DAG and return nodes in topological order.
///
/// The flattened form of [`execution_layers`].
pub fn validate_dag(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    Ok(execution_layers(workflow)?.into_iter().flatten().collect())
}
