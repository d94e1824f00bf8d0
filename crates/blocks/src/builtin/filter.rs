//! Keep the items that satisfy a [`Condition`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{default_items_field, take_items};
use crate::{BlockError, BlockLogic, BlockOutput, Condition, ExecutionContext};

#[derive(Debug, Deserialize)]
pub struct FilterConfig {
    pub condition: Condition,
    /// Array field to filter when the input is an object.
    #[serde(default = "default_items_field")]
    pub items_field: String,
}

pub struct Filter;

#[async_trait]
impl BlockLogic for Filter {
    type Config = FilterConfig;

    async fn execute_live(
        &self,
        config: &FilterConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<BlockOutput, BlockError> {
        let (items, source) = take_items(input, &config.items_field)?;
        let total = items.len();
        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| config.condition.evaluate(item))
            .collect();
        let kept_count = kept.len();

        ctx.logger()
            .info(format!("kept {kept_count} of {total} items"));

        Ok(BlockOutput::new(source.rebuild(kept))
            .with_metadata("kept", kept_count)
            .with_metadata("dropped", total - kept_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, Dispatch, ExecutionMode, NodeStatus};
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::standalone("filter", ExecutionMode::Production)
    }

    fn config() -> Value {
        json!({ "condition": { "field": "email", "operator": "exists" } })
    }

    #[tokio::test]
    async fn filters_records_field_and_keeps_other_keys() {
        let input = json!({
            "source": "crm",
            "records": [
                { "id": 1, "email": "a@x.io" },
                { "id": 2 },
                { "id": 3, "email": "c@x.io" }
            ]
        });
        let result = Dispatch::new(Filter).execute(&config(), input, &ctx()).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.output["source"], "crm");
        assert_eq!(result.output["records"].as_array().map(Vec::len), Some(2));
        assert_eq!(result.metadata["kept"], 2);
        assert_eq!(result.metadata["dropped"], 1);
    }

    #[tokio::test]
    async fn filters_bare_arrays() {
        let input = json!([{ "email": "a@x.io" }, {}]);
        let result = Dispatch::new(Filter).execute(&config(), input, &ctx()).await;
        assert_eq!(result.output, json!([{ "email": "a@x.io" }]));
    }

    #[tokio::test]
    async fn non_array_field_fails_the_node() {
        let input = json!({ "records": "oops" });
        let result = Dispatch::new(Filter).execute(&config(), input, &ctx()).await;
        assert_eq!(result.status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_operator_drops_everything() {
        let config = json!({ "condition": { "field": "email", "operator": "sounds_like" } });
        let input = json!([{ "email": "a@x.io" }]);
        let result = Dispatch::new(Filter).execute(&config, input, &ctx()).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.output, json!([]));
    }
}
