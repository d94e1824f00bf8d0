//! Publish context variables for downstream template expansion.
//!
//! Values in `variables` are taken literally (after the usual config
//! templating); `from_input` copies values out of the input by dotted path,
//! which is how detection-style steps (country, language) hand their result
//! to later blocks.  The input passes through unchanged.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::condition::resolve_path;
use crate::{BlockError, BlockLogic, BlockOutput, ExecutionContext};

#[derive(Debug, Default, Deserialize)]
pub struct SetVariableConfig {
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// variable name → dotted path into the input.
    #[serde(default)]
    pub from_input: BTreeMap<String, String>,
}

pub struct SetVariable;

#[async_trait]
impl BlockLogic for SetVariable {
    type Config = SetVariableConfig;

    async fn execute_live(
        &self,
        config: &SetVariableConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<BlockOutput, BlockError> {
        if config.variables.is_empty() && config.from_input.is_empty() {
            return Err(BlockError::InvalidConfig(
                "set_variable needs 'variables' or 'from_input'".into(),
            ));
        }

        let mut published = Vec::new();
        for (name, value) in &config.variables {
            ctx.set_variable(name.clone(), value.clone());
            published.push(name.clone());
        }
        for (name, path) in &config.from_input {
            match resolve_path(&input, path) {
                Some(value) => {
                    ctx.set_variable(name.clone(), value.clone());
                    published.push(name.clone());
                }
                None => ctx
                    .logger()
                    .warn(format!("input has no '{path}', variable '{name}' not set")),
            }
        }

        Ok(BlockOutput::new(input).with_metadata("published", published))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, Dispatch, ExecutionMode, NodeStatus};
    use serde_json::json;

    #[tokio::test]
    async fn publishes_literal_and_input_values() {
        let ctx = ExecutionContext::standalone("vars", ExecutionMode::Production);
        let config = json!({
            "variables": { "language": "de" },
            "from_input": { "country": "company.country", "missing": "nope" }
        });
        let input = json!({ "company": { "country": "DE" } });

        let result = Dispatch::new(SetVariable).execute(&config, input.clone(), &ctx).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.output, input);
        assert_eq!(ctx.variable("language"), Some(json!("de")));
        assert_eq!(ctx.variable("country"), Some(json!("DE")));
        assert_eq!(ctx.variable("missing"), None);
        assert_eq!(result.metadata["published"], json!(["language", "country"]));
    }

    #[tokio::test]
    async fn empty_config_is_rejected() {
        let ctx = ExecutionContext::standalone("vars", ExecutionMode::Production);
        let result = Dispatch::new(SetVariable).execute(&Value::Null, json!({}), &ctx).await;
        assert_eq!(result.status, NodeStatus::Failed);
    }
}
