//! What a workflow run hands back to its caller.

use std::collections::BTreeMap;

use blocks::NodeResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every scheduled node completed.  Nodes on an untaken branch do not
    /// count against this.
    Completed,
    /// At least one node failed or never ran.
    Failed,
}

/// Per-node outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    Completed,
    Failed,
    /// An upstream dependency did not complete, so the node was never
    /// scheduled.
    NeverRun,
    /// Every incoming edge selected a port its source did not emit, so the
    /// node had nothing to run on.
    NotTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEvent {
    RunStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    RunFinished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub event: TimelineEvent,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default)]
    pub details: Value,
}

impl TimelineEntry {
    pub fn run(event: TimelineEvent, details: Value) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
            node_id: None,
            details,
        }
    }

    pub fn node(event: TimelineEvent, node_id: &str, details: Value) -> Self {
        Self {
            node_id: Some(node_id.to_owned()),
            ..Self::run(event, details)
        }
    }
}

/// The full record of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub status: RunStatus,
    /// Results of every node that was scheduled, keyed by node ID.
    pub results: BTreeMap<String, NodeResult>,
    /// Nodes skipped because a dependency did not complete, in the order
    /// they were skipped.
    pub never_run: Vec<String>,
    /// Nodes on a branch that was not taken, in the order they were
    /// reached.
    #[serde(default)]
    pub not_taken: Vec<String>,
    pub timeline: Vec<TimelineEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// `None` for an ID that is not part of the workflow.
    pub fn outcome(&self, node_id: &str) -> Option<NodeOutcome> {
        if let Some(result) = self.results.get(node_id) {
            return Some(if result.is_completed() {
                NodeOutcome::Completed
            } else {
                NodeOutcome::Failed
            });
        }
        if self.never_run.iter().any(|id| id == node_id) {
            return Some(NodeOutcome::NeverRun);
        }
        self.not_taken
            .iter()
            .any(|id| id == node_id)
            .then_some(NodeOutcome::NotTaken)
    }

    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.results.get(node_id)
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.results.get(node_id).map(|r| &r.output)
    }

    pub fn failed_nodes(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| !r.is_completed())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Wall-clock duration of the run in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_distinguishes_every_state() {
        let now = Utc::now();
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), NodeResult::completed(json!(1)));
        results.insert("b".to_string(), NodeResult::failed("boom"));
        let report = RunReport {
            workflow_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            status: RunStatus::Failed,
            results,
            never_run: vec!["c".into()],
            not_taken: vec!["d".into()],
            timeline: Vec::new(),
            started_at: now,
            finished_at: now,
        };

        assert_eq!(report.outcome("a"), Some(NodeOutcome::Completed));
        assert_eq!(report.outcome("b"), Some(NodeOutcome::Failed));
        assert_eq!(report.outcome("c"), Some(NodeOutcome::NeverRun));
        assert_eq!(report.outcome("d"), Some(NodeOutcome::NotTaken));
        assert_eq!(report.outcome("zzz"), None);
        assert_eq!(report.failed_nodes(), vec!["b"]);
        assert_eq!(report.output("a"), Some(&json!(1)));
    }

    #[test]
    fn timeline_entries_serialize_with_snake_case_events() {
        let entry = TimelineEntry::node(TimelineEvent::NodeSkipped, "x", json!({ "blockedBy": ["y"] }));
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["event"], "node_skipped");
        assert_eq!(v["nodeId"], "x");
    }
}
