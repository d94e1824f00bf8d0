//! Identity pass-through.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{BlockError, BlockLogic, BlockOutput, ExecutionContext};

/// Echo accepts (and ignores) any config.
#[derive(Debug, Default, Deserialize)]
pub struct EchoConfig {}

pub struct Echo;

#[async_trait]
impl BlockLogic for Echo {
    type Config = EchoConfig;

    async fn execute_live(
        &self,
        _config: &EchoConfig,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<BlockOutput, BlockError> {
        Ok(BlockOutput::new(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, Dispatch, ExecutionMode, NodeStatus};
    use serde_json::json;

    #[tokio::test]
    async fn returns_input_verbatim() {
        let block = Dispatch::new(Echo);
        let ctx = ExecutionContext::standalone("echo", ExecutionMode::Production);
        let result = block.execute(&json!({ "ignored": true }), json!({ "v": 1 }), &ctx).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.output, json!({ "v": 1 }));
    }
}
