//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the DAG and splits it into dependency layers.
//! 2. Runs each layer's nodes concurrently (bounded by `max_concurrency`).
//! 3. Feeds every node the merged payloads of its incoming edges, or the
//!    run's initial input when it has none.
//! 4. Skips nodes whose dependencies did not all complete ("never run"),
//!    and nodes whose every incoming edge selects a port its source did
//!    not emit ("not taken").
//! 5. Collects node results and a timeline into a [`RunReport`].
//!
//! Block failures never abort the run: independent branches keep going and
//! the failure shows up in the report.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use blocks::{
    Block, BlockRegistry, ExecutionContext, ExecutionMode, NodeResult, NoopProgress, ProgressSink,
    RetryPolicy,
};
use cache::Cache;
use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::dag::execution_layers;
use crate::merge::merge_inputs;
use crate::models::{EdgeDefinition, NodeDefinition};
use crate::report::{RunReport, RunStatus, TimelineEntry, TimelineEvent};
use crate::{EngineError, Workflow};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on nodes running at the same time within a layer.
    pub max_concurrency: usize,
    /// Retry policy handed to every node's context.
    pub retry: RetryPolicy,
    /// Per-attempt timeout for a node; `None` waits forever.
    pub node_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            retry: RetryPolicy::default(),
            node_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Per-run settings supplied by the caller.
#[derive(Clone, Default)]
pub struct RunOptions {
    pub mode: ExecutionMode,
    pub secrets: HashMap<String, String>,
    /// Variables every node starts from.
    pub variables: HashMap<String, Value>,
    pub disable_cache: bool,
    pub progress: Option<Arc<dyn ProgressSink>>,
    /// Generated when not supplied.
    pub execution_id: Option<Uuid>,
}

impl RunOptions {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cache_disabled(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    pub fn with_execution_id(mut self, id: Uuid) -> Self {
        self.execution_id = Some(id);
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut secret_names: Vec<&String> = self.secrets.keys().collect();
        secret_names.sort();
        f.debug_struct("RunOptions")
            .field("mode", &self.mode)
            .field("secrets", &secret_names)
            .field("variables", &self.variables)
            .field("disable_cache", &self.disable_cache)
            .field("progress", &self.progress.is_some())
            .field("execution_id", &self.execution_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

/// What a finished node task hands back.
struct NodeRun {
    node_id: String,
    result: NodeResult,
    variables: HashMap<String, Value>,
}

/// Mutable bookkeeping for a single run.
struct RunState {
    results: BTreeMap<String, NodeResult>,
    /// Variables each completed node ended with.
    published: HashMap<String, HashMap<String, Value>>,
    never_run: Vec<String>,
    not_taken: Vec<String>,
    timeline: Vec<TimelineEntry>,
}

impl RunState {
    fn new() -> Self {
        Self {
            results: BTreeMap::new(),
            published: HashMap::new(),
            never_run: Vec::new(),
            not_taken: Vec::new(),
            timeline: Vec::new(),
        }
    }

    fn record(&mut self, node_id: String, result: NodeResult) {
        let entry = if result.is_completed() {
            info!(node_id = %node_id, ms = result.execution_time, "node completed");
            TimelineEntry::node(
                TimelineEvent::NodeCompleted,
                &node_id,
                json!({ "executionTime": result.execution_time, "retryCount": result.retry_count }),
            )
        } else {
            let message = result.error.clone().unwrap_or_default();
            warn!(node_id = %node_id, error = %message, "node failed");
            TimelineEntry::node(
                TimelineEvent::NodeFailed,
                &node_id,
                json!({ "error": message, "retryCount": result.retry_count }),
            )
        };
        self.timeline.push(entry);
        self.results.insert(node_id, result);
    }

    /// Sources of `incoming` that failed or never ran.  A source on an
    /// untaken branch is not a blocker; its edges just carry nothing.
    fn blockers<'a>(&self, incoming: &[&'a EdgeDefinition]) -> Vec<&'a str> {
        let mut blocked: Vec<&str> = Vec::new();
        for edge in incoming {
            let done = self.not_taken.contains(&edge.source)
                || self
                    .results
                    .get(&edge.source)
                    .is_some_and(NodeResult::is_completed);
            if !done && !blocked.contains(&edge.source.as_str()) {
                blocked.push(edge.source.as_str());
            }
        }
        blocked
    }

    /// Input for a node: the initial input for roots, otherwise the fold of
    /// its incoming edge payloads in declaration order.
    ///
    /// `None` when the node has incoming edges but none of them carried a
    /// payload.
    fn gather_input(&self, incoming: &[&EdgeDefinition], initial_input: &Value) -> Option<Value> {
        if incoming.is_empty() {
            return Some(initial_input.clone());
        }
        let payloads: Vec<Value> = incoming
            .iter()
            .filter_map(|edge| {
                let output = &self.results.get(&edge.source)?.output;
                edge.payload(output)
            })
            .collect();
        if payloads.is_empty() {
            return None;
        }
        Some(merge_inputs(payloads))
    }

    /// Run-level variables overlaid with what each upstream node published.
    fn gather_variables(
        &self,
        incoming: &[&EdgeDefinition],
        base: &HashMap<String, Value>,
    ) -> HashMap<String, Value> {
        let mut variables = base.clone();
        for edge in incoming {
            if let Some(published) = self.published.get(&edge.source) {
                variables.extend(published.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        variables
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator that runs workflow executions.
///
/// Construct one executor per process and call [`WorkflowExecutor::run`]
/// with the workflow and initial input.  The executor holds no per-run
/// state, so concurrent runs are fine.
pub struct WorkflowExecutor {
    registry: Arc<BlockRegistry>,
    config: ExecutorConfig,
    cache: Option<Arc<Cache<Value>>>,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(registry: Arc<BlockRegistry>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            config,
            cache: None,
        }
    }

    /// Share a response cache with every block this executor runs.
    pub fn with_cache(mut self, cache: Arc<Cache<Value>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the workflow and return the report.
    ///
    /// # Errors
    /// Only for an invalid workflow definition (see [`EngineError`]).
    /// Node failures are reported in the [`RunReport`].
    #[instrument(
        skip(self, workflow, initial_input, options),
        fields(workflow_id = %workflow.id, execution_id = tracing::field::Empty)
    )]
    pub async fn run(
        &self,
        workflow: &Workflow,
        initial_input: Value,
        options: RunOptions,
    ) -> Result<RunReport, EngineError> {
        let layers = execution_layers(workflow)?;
        let execution_id = options.execution_id.unwrap_or_else(Uuid::new_v4);
        tracing::Span::current().record("execution_id", tracing::field::display(execution_id));
        info!(
            nodes = workflow.nodes.len(),
            layers = layers.len(),
            mode = %options.mode,
            "DAG validated, starting run"
        );

        let started_at = Utc::now();
        let mut state = RunState::new();
        state.timeline.push(TimelineEntry::run(
            TimelineEvent::RunStarted,
            json!({ "nodes": workflow.nodes.len(), "layers": layers.len() }),
        ));

        let node_map: HashMap<&str, &NodeDefinition> =
            workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let secrets = Arc::new(options.secrets.clone());
        let progress: Arc<dyn ProgressSink> = options
            .progress
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgress));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        for layer in &layers {
            let mut tasks: JoinSet<NodeRun> = JoinSet::new();
            let mut spawned: Vec<&str> = Vec::new();

            for node_id in layer {
                let node = node_map[node_id.as_str()];
                let incoming = workflow.incoming(node_id);

                let blocked = state.blockers(&incoming);
                if !blocked.is_empty() {
                    info!(node_id = %node_id, blocked_by = ?blocked, "node never run");
                    state.timeline.push(TimelineEntry::node(
                        TimelineEvent::NodeSkipped,
                        node_id,
                        json!({ "blockedBy": blocked }),
                    ));
                    state.never_run.push(node_id.clone());
                    continue;
                }

                let Some(input) = state.gather_input(&incoming, &initial_input) else {
                    info!(node_id = %node_id, "branch not taken");
                    state.timeline.push(TimelineEntry::node(
                        TimelineEvent::NodeSkipped,
                        node_id,
                        json!({ "notTaken": true }),
                    ));
                    state.not_taken.push(node_id.clone());
                    continue;
                };

                let block = match self.registry.create(&node.node_type) {
                    Ok(block) => block,
                    Err(err) => {
                        error!(node_id = %node_id, error = %err, "cannot create block");
                        let result = NodeResult::failed(err.to_string())
                            .with_metadata("errorKind", "registry");
                        state.record(node_id.clone(), result);
                        continue;
                    }
                };

                let mut ctx = ExecutionContext::new(workflow.id, execution_id, node_id.as_str())
                    .with_mode(options.mode)
                    .with_variables(state.gather_variables(&incoming, &options.variables))
                    .with_secrets(Arc::clone(&secrets))
                    .with_cache_disabled(options.disable_cache)
                    .with_retry_policy(self.config.retry.clone())
                    .with_timeout(self.config.node_timeout)
                    .with_progress(Arc::clone(&progress));
                if let Some(cache) = &self.cache {
                    ctx = ctx.with_cache(Arc::clone(cache));
                }

                state.timeline.push(TimelineEntry::node(
                    TimelineEvent::NodeStarted,
                    node_id,
                    json!({ "type": node.node_type }),
                ));

                let span = info_span!("node", node_id = %node_id, block_type = %node.node_type);
                tasks.spawn(
                    run_node(
                        block,
                        node.config.clone(),
                        input,
                        ctx,
                        Arc::clone(&semaphore),
                    )
                    .instrument(span),
                );
                spawned.push(node_id.as_str());
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(run) => {
                        if run.result.is_completed() {
                            state.published.insert(run.node_id.clone(), run.variables);
                        }
                        state.record(run.node_id, run.result);
                    }
                    Err(err) => error!(error = %err, "node task did not finish"),
                }
            }

            // A task that was cancelled never reported back.
            for node_id in spawned {
                if !state.results.contains_key(node_id) {
                    state.record(
                        node_id.to_owned(),
                        NodeResult::failed("node task was cancelled")
                            .with_metadata("errorKind", "cancelled"),
                    );
                }
            }
        }

        let all_completed = state.results.values().all(NodeResult::is_completed);
        let status = if state.never_run.is_empty() && all_completed {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let finished_at = Utc::now();
        state.timeline.push(TimelineEntry::run(
            TimelineEvent::RunFinished,
            json!({
                "status": status,
                "failed": state.results.values().filter(|r| !r.is_completed()).count(),
                "neverRun": state.never_run.len(),
                "notTaken": state.not_taken.len(),
            }),
        ));

        info!(?status, "run finished");

        Ok(RunReport {
            workflow_id: workflow.id,
            execution_id,
            status,
            results: state.results,
            never_run: state.never_run,
            not_taken: state.not_taken,
            timeline: state.timeline,
            started_at,
            finished_at,
        })
    }
}

/// Execute one node inside its own task, turning a panic into a failed
/// result.
async fn run_node(
    block: Box<dyn Block>,
    config: Value,
    input: Value,
    ctx: ExecutionContext,
    semaphore: Arc<Semaphore>,
) -> NodeRun {
    // The semaphore is never closed, so a failed acquire cannot happen.
    let _permit = semaphore.acquire_owned().await.ok();
    let start = Utc::now();

    let result = match AssertUnwindSafe(block.execute(&config, input, &ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(error = %message, "block panicked");
            let mut result = NodeResult::failed(format!("block panicked: {message}"))
                .with_metadata("errorKind", "panic")
                .with_timing(start, Utc::now());
            result.logs = ctx.logger().entries();
            result
        }
    };

    NodeRun {
        node_id: ctx.node_id().to_owned(),
        result,
        variables: ctx.variables(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
