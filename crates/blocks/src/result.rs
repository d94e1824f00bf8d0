//! The result envelope every block invocation produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line written through [`Logger`](crate::Logger) during a block run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// BlockOutput
// ---------------------------------------------------------------------------

/// What block logic returns on success; the dispatch layer wraps it into a
/// [`NodeResult`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockOutput {
    pub output: Value,
    pub metadata: Map<String, Value>,
}

impl BlockOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// NodeResult
// ---------------------------------------------------------------------------

/// The stable result envelope: `{status, output, executionTime, error,
/// retryCount, startTime, endTime, metadata, logs}`.
///
/// `error` is present iff `status` is `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub status: NodeStatus,
    pub output: Value,
    /// Wall-clock duration in milliseconds.
    pub execution_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl NodeResult {
    pub fn completed(output: Value) -> Self {
        let now = Utc::now();
        Self {
            status: NodeStatus::Completed,
            output,
            execution_time: 0,
            error: None,
            retry_count: 0,
            start_time: now,
            end_time: now,
            metadata: Map::new(),
            logs: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Failed,
            output: Value::Null,
            error: Some(error.into()),
            ..Self::completed(Value::Null)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == NodeStatus::Completed
    }

    /// Stamp start/end times and the derived duration.
    pub fn with_timing(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.execution_time = (end - start).num_milliseconds().max(0) as u64;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<BlockOutput> for NodeResult {
    fn from(out: BlockOutput) -> Self {
        let mut result = NodeResult::completed(out.output);
        result.metadata = out.metadata;
        result
    }
}
