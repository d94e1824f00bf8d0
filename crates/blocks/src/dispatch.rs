//! `Dispatch` — turns any [`BlockLogic`] into a [`Block`].
//!
//! For every invocation:
//! 1. Render templates in the raw config against the context variables.
//! 2. Parse the typed config (a bad config fails the node immediately).
//! 3. Pick the mock branch when the block supports it and either the
//!    context mode is `demo`/`test` or the config says `"mode": "mock"`.
//! 4. Run the chosen branch under the context's timeout and retry policy.
//! 5. Wrap the outcome into a [`NodeResult`] with timings, retry count and
//!    the logs written through the context.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::resilience::{retry, with_timeout};
use crate::template::render_config;
use crate::{Block, BlockError, BlockLogic, BlockOutput, ExecutionContext, NodeResult};

pub struct Dispatch<L> {
    logic: L,
}

impl<L: BlockLogic> Dispatch<L> {
    pub fn new(logic: L) -> Self {
        Self { logic }
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    fn parse_config(
        &self,
        raw: &Value,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> Result<L::Config, BlockError> {
        let raw = match raw {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        let scope = json!({ "vars": ctx.variables(), "input": input });
        let rendered = render_config(&raw, self.logic.raw_config_keys(), &scope)?;
        Ok(serde_json::from_value(rendered)?)
    }

    async fn run_branch(
        &self,
        config: &L::Config,
        input: Value,
        ctx: &ExecutionContext,
        mock: bool,
    ) -> Result<BlockOutput, BlockError> {
        if mock {
            self.logic.execute_mock(config, input, ctx).await
        } else {
            self.logic.execute_live(config, input, ctx).await
        }
    }
}

/// `config.mode == "mock"` forces the mock branch regardless of run mode.
fn config_requests_mock(config: &Value) -> bool {
    config.get("mode").and_then(Value::as_str) == Some("mock")
}

fn error_kind(err: &BlockError) -> &'static str {
    match err {
        BlockError::InvalidConfig(_) => "config",
        BlockError::Retryable(_) => "transient",
        BlockError::Fatal(_) => "fatal",
        BlockError::Timeout(_) => "timeout",
    }
}

#[async_trait]
impl<L: BlockLogic> Block for Dispatch<L> {
    async fn execute(&self, config: &Value, input: Value, ctx: &ExecutionContext) -> NodeResult {
        let start = Utc::now();
        let mock = self.logic.supports_mock()
            && (ctx.mode().is_mock() || config_requests_mock(config));

        ctx.logger().debug(format!(
            "executing {} branch",
            if mock { "mock" } else { "live" }
        ));

        let (outcome, retries) = match self.parse_config(config, &input, ctx) {
            Err(err) => (Err(err), 0),
            Ok(typed) => {
                let typed = &typed;
                let input = &input;
                retry(ctx.retry_policy(), ctx.node_id(), move |_| async move {
                    with_timeout(ctx.timeout(), self.run_branch(typed, input.clone(), ctx, mock))
                        .await
                })
                .await
            }
        };

        let mut result = match outcome {
            Ok(out) => {
                let mut result = NodeResult::from(out);
                if mock {
                    result.metadata.insert("mock".into(), Value::Bool(true));
                }
                result
            }
            Err(err) => {
                ctx.logger().error(err.to_string());
                NodeResult::failed(err.to_string()).with_metadata("errorKind", error_kind(&err))
            }
        };

        result.retry_count = retries;
        result.logs = ctx.logger().entries();
        result.with_timing(start, Utc::now())
    }

    fn supports_mock(&self) -> bool {
        self.logic.supports_mock()
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::RetryPolicy;
    use crate::{ExecutionMode, NodeStatus};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Deserialize)]
    struct GreetConfig {
        name: String,
        #[serde(default = "default_greeting")]
        greeting: String,
    }

    fn default_greeting() -> String {
        "hello".into()
    }

    #[derive(Default)]
    struct Greet {
        live_calls: AtomicU32,
        failures_before_success: u32,
    }

    #[async_trait]
    impl BlockLogic for Greet {
        type Config = GreetConfig;

        async fn execute_live(
            &self,
            config: &GreetConfig,
            _input: Value,
            ctx: &ExecutionContext,
        ) -> Result<BlockOutput, BlockError> {
            let call = self.live_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(BlockError::Retryable("upstream 503".into()));
            }
            ctx.logger().info("greeted");
            Ok(BlockOutput::new(json!(format!("{} {}", config.greeting, config.name))))
        }

        async fn execute_mock(
            &self,
            config: &GreetConfig,
            _input: Value,
            _ctx: &ExecutionContext,
        ) -> Result<BlockOutput, BlockError> {
            Ok(BlockOutput::new(json!(format!("mock {}", config.name))))
        }

        fn supports_mock(&self) -> bool {
            true
        }
    }

    fn live_ctx() -> ExecutionContext {
        ExecutionContext::standalone("greet", ExecutionMode::Production)
    }

    #[tokio::test]
    async fn live_run_applies_config_defaults() {
        let block = Dispatch::new(Greet::default());
        let result = block.execute(&json!({ "name": "Ada" }), Value::Null, &live_ctx()).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.output, json!("hello Ada"));
        assert!(result.metadata.get("mock").is_none());
        assert_eq!(result.logs.len(), 2);
    }

    #[tokio::test]
    async fn test_mode_selects_mock_branch() {
        let block = Dispatch::new(Greet::default());
        let ctx = ExecutionContext::standalone("greet", ExecutionMode::Test);
        let result = block.execute(&json!({ "name": "Ada" }), Value::Null, &ctx).await;

        assert_eq!(result.output, json!("mock Ada"));
        assert_eq!(result.metadata["mock"], true);
        assert_eq!(block.logic().live_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn config_mode_mock_overrides_production() {
        let block = Dispatch::new(Greet::default());
        let config = json!({ "name": "Ada", "mode": "mock" });
        let result = block.execute(&config, Value::Null, &live_ctx()).await;
        assert_eq!(result.output, json!("mock Ada"));
    }

    #[tokio::test]
    async fn missing_required_field_fails_without_running() {
        let block = Dispatch::new(Greet::default());
        let result = block.execute(&json!({}), Value::Null, &live_ctx()).await;

        assert_eq!(result.status, NodeStatus::Failed);
        assert!(result.error.as_deref().unwrap_or("").contains("name"));
        assert_eq!(result.metadata["errorKind"], "config");
        assert_eq!(block.logic().live_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn templates_resolve_from_context_variables() {
        let block = Dispatch::new(Greet::default());
        let ctx = live_ctx();
        ctx.set_variable("person", json!("Grace"));
        let result = block
            .execute(&json!({ "name": "{{ vars.person }}" }), Value::Null, &ctx)
            .await;
        assert_eq!(result.output, json!("hello Grace"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_and_counted() {
        let block = Dispatch::new(Greet {
            failures_before_success: 2,
            ..Greet::default()
        });
        let ctx = live_ctx().with_retry_policy(RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        });
        let result = block.execute(&json!({ "name": "Ada" }), Value::Null, &ctx).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.retry_count, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_report_failure() {
        let block = Dispatch::new(Greet {
            failures_before_success: 10,
            ..Greet::default()
        });
        let result = block.execute(&json!({ "name": "Ada" }), Value::Null, &live_ctx()).await;

        assert_eq!(result.status, NodeStatus::Failed);
        assert_eq!(result.metadata["errorKind"], "transient");
        assert_eq!(result.retry_count, 0);
    }
}
