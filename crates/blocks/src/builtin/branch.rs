//! Route the input to one of two output ports.
//!
//! The output is `{"true": input}` or `{"false": input}`; downstream edges
//! pick a side with `source_port`.  The unused port is simply absent, so
//! nodes fed only from it are not run.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{BlockError, BlockLogic, BlockOutput, Condition, ExecutionContext};

#[derive(Debug, Deserialize)]
pub struct BranchConfig {
    pub condition: Condition,
}

pub struct Branch;

#[async_trait]
impl BlockLogic for Branch {
    type Config = BranchConfig;

    async fn execute_live(
        &self,
        config: &BranchConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<BlockOutput, BlockError> {
        let port = if config.condition.evaluate(&input) { "true" } else { "false" };
        ctx.logger().debug(format!("routing to '{port}'"));

        let mut out = Map::new();
        out.insert(port.to_owned(), input);
        Ok(BlockOutput::new(Value::Object(out)).with_metadata("branch", port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, Dispatch, ExecutionMode};
    use serde_json::json;

    #[tokio::test]
    async fn emits_on_matching_port() {
        let ctx = ExecutionContext::standalone("branch", ExecutionMode::Production);
        let config = json!({ "condition": { "field": "score", "operator": "greater_than", "value": 50 } });

        let high = Dispatch::new(Branch).execute(&config, json!({ "score": 80 }), &ctx).await;
        assert_eq!(high.output, json!({ "true": { "score": 80 } }));
        assert_eq!(high.metadata["branch"], "true");

        let low = Dispatch::new(Branch).execute(&config, json!({ "score": 10 }), &ctx).await;
        assert_eq!(low.output, json!({ "false": { "score": 10 } }));
    }
}
