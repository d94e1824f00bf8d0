//! Engine-level error types.
//!
//! Only structural problems with a workflow are errors.  A node that fails
//! at run time is reported in the [`RunReport`](crate::RunReport), never
//! raised from [`WorkflowExecutor::run`](crate::WorkflowExecutor::run).

use thiserror::Error;

/// Validation errors for a workflow definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// Two or more edges share the same ID.
    #[error("duplicate edge ID: '{0}'")]
    DuplicateEdgeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge '{edge}' references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        edge: String,
        node_id: String,
        side: &'static str,
    },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle through: {}", .0.join(", "))]
    CycleDetected(Vec<String>),
}
