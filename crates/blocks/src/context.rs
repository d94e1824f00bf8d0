//! Per-node execution context.
//!
//! Defined here (in the blocks crate) so both the engine and individual
//! block implementations can import it without a circular dependency.
//! The orchestrator builds a fresh context for every node invocation and
//! discards it afterwards.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cache::Cache;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::result::{LogEntry, LogLevel};
use crate::resilience::RetryPolicy;
use crate::BlockError;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Selects between a block's live and mock code paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Production,
    Demo,
    Test,
}

impl ExecutionMode {
    /// `demo` and `test` runs must not reach external services.
    pub fn is_mock(self) -> bool {
        matches!(self, ExecutionMode::Demo | ExecutionMode::Test)
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "live" => Ok(ExecutionMode::Production),
            "demo" => Ok(ExecutionMode::Demo),
            "test" => Ok(ExecutionMode::Test),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Production => "production",
            ExecutionMode::Demo => "demo",
            ExecutionMode::Test => "test",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub node_id: String,
    pub percent: u8,
    pub event: String,
}

/// Receives progress updates from long-running blocks.  The hosting
/// application turns these into user-visible status.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

impl ProgressSink for tokio::sync::mpsc::UnboundedSender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(event);
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Block-facing logger.  Every call is emitted as a `tracing` event tagged
/// with the node id and also kept for the node's result envelope.
#[derive(Clone)]
pub struct Logger {
    node_id: Arc<str>,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: Arc::from(node_id),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => tracing::debug!(node_id = %self.node_id, "{message}"),
            LogLevel::Info => tracing::info!(node_id = %self.node_id, "{message}"),
            LogLevel::Warn => tracing::warn!(node_id = %self.node_id, "{message}"),
            LogLevel::Error => tracing::error!(node_id = %self.node_id, "{message}"),
        }
        self.lock().push(LogEntry {
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.record(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    /// Snapshot of everything logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Cross-cutting state handed to every block invocation.
pub struct ExecutionContext {
    workflow_id: Uuid,
    execution_id: Uuid,
    node_id: String,
    mode: ExecutionMode,
    /// Published by blocks for templating in downstream configs.
    variables: Mutex<HashMap<String, Value>>,
    /// Never logged; `Debug` prints the names only.
    secrets: Arc<HashMap<String, String>>,
    disable_cache: bool,
    cache: Option<Arc<Cache<Value>>>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    logger: Logger,
    progress: Arc<dyn ProgressSink>,
    last_progress: AtomicU8,
}

impl ExecutionContext {
    pub fn new(workflow_id: Uuid, execution_id: Uuid, node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            workflow_id,
            execution_id,
            logger: Logger::new(&node_id),
            node_id,
            mode: ExecutionMode::default(),
            variables: Mutex::new(HashMap::new()),
            secrets: Arc::new(HashMap::new()),
            disable_cache: false,
            cache: None,
            retry: RetryPolicy::none(),
            timeout: None,
            progress: Arc::new(NoopProgress),
            last_progress: AtomicU8::new(0),
        }
    }

    /// A throwaway context for running a single block outside a workflow.
    pub fn standalone(node_id: impl Into<String>, mode: ExecutionMode) -> Self {
        Self::new(Uuid::new_v4(), Uuid::new_v4(), node_id).with_mode(mode)
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_variables(self, variables: HashMap<String, Value>) -> Self {
        Self {
            variables: Mutex::new(variables),
            ..self
        }
    }

    pub fn with_secrets(mut self, secrets: Arc<HashMap<String, String>>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_cache(mut self, cache: Arc<Cache<Value>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cache_disabled(mut self, disabled: bool) -> Self {
        self.disable_cache = disabled;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cache_disabled(&self) -> bool {
        self.disable_cache
    }

    /// The shared cache, unless caching is disabled for this run.
    pub fn cache(&self) -> Option<&Arc<Cache<Value>>> {
        if self.disable_cache {
            None
        } else {
            self.cache.as_ref()
        }
    }

    pub fn secret(&self, name: &str) -> Option<&str> {
        self.secrets.get(name).map(String::as_str)
    }

    /// Like [`secret`](Self::secret), but a missing secret is a config error.
    pub fn require_secret(&self, name: &str) -> Result<&str, BlockError> {
        self.secret(name)
            .ok_or_else(|| BlockError::InvalidConfig(format!("missing secret '{name}'")))
    }

    // -- variables ----------------------------------------------------------

    fn vars(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.variables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.vars().get(name).cloned()
    }

    /// Insert or overwrite a variable.  There is no removal.
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.vars().insert(name.into(), value);
    }

    pub fn variables(&self) -> HashMap<String, Value> {
        self.vars().clone()
    }

    // -- progress -----------------------------------------------------------

    /// Report progress.  Values are clamped to 100 and never go backwards:
    /// an update lower than the last reported percentage is ignored.
    pub fn update_progress(&self, percent: u8, event: impl Into<String>) {
        let percent = percent.min(100);
        let previous = self.last_progress.fetch_max(percent, Ordering::SeqCst);
        if percent < previous {
            return;
        }
        self.progress.report(ProgressEvent {
            node_id: self.node_id.clone(),
            percent,
            event: event.into(),
        });
    }

    pub fn progress(&self) -> u8 {
        self.last_progress.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secret_names: Vec<&String> = self.secrets.keys().collect();
        secret_names.sort();
        f.debug_struct("ExecutionContext")
            .field("workflow_id", &self.workflow_id)
            .field("execution_id", &self.execution_id)
            .field("node_id", &self.node_id)
            .field("mode", &self.mode)
            .field("variables", &*self.vars())
            .field("secrets", &secret_names)
            .field("disable_cache", &self.disable_cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::standalone("n1", ExecutionMode::Test)
    }

    #[test]
    fn debug_output_never_contains_secret_values() {
        let secrets = Arc::new(HashMap::from([("API_KEY".to_string(), "sk-123".to_string())]));
        let ctx = ctx().with_secrets(secrets);
        let rendered = format!("{ctx:?}");
        assert!(rendered.contains("API_KEY"));
        assert!(!rendered.contains("sk-123"));
    }

    #[test]
    fn variables_overwrite() {
        let ctx = ctx();
        ctx.set_variable("country", json!("DE"));
        ctx.set_variable("country", json!("FR"));
        assert_eq!(ctx.variable("country"), Some(json!("FR")));
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = ctx().with_progress(Arc::new(tx));

        ctx.update_progress(40, "a");
        ctx.update_progress(20, "ignored");
        ctx.update_progress(250, "done");

        assert_eq!(rx.try_recv().map(|e| e.percent), Ok(40));
        assert_eq!(rx.try_recv().map(|e| e.percent), Ok(100));
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.progress(), 100);
    }

    #[test]
    fn disabled_cache_is_hidden_from_blocks() {
        let ctx = ctx()
            .with_cache(Arc::new(Cache::default()))
            .with_cache_disabled(true);
        assert!(ctx.cache().is_none());
    }

    #[test]
    fn logger_keeps_entries() {
        let ctx = ctx();
        ctx.logger().info("hello");
        ctx.logger().warn("careful");
        let entries = ctx.logger().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].level, LogLevel::Warn);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("DEMO".parse::<ExecutionMode>(), Ok(ExecutionMode::Demo));
        assert!("staging".parse::<ExecutionMode>().is_err());
        assert!(ExecutionMode::Test.is_mock());
        assert!(!ExecutionMode::Production.is_mock());
    }
}
