//! The block contract.
//!
//! [`Block`] is what the engine dispatches through: it always produces a
//! [`NodeResult`], never an error.  Implementors normally write a
//! [`BlockLogic`] instead and let [`Dispatch`](crate::Dispatch) provide the
//! `Block` impl, which handles config parsing, mock/live selection, retries,
//! timeouts and error conversion in one place.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{BlockError, BlockOutput, ExecutionContext, NodeResult};

/// The engine-facing contract.
///
/// Instances are constructed fresh for every invocation and hold no state
/// across invocations other than constants.
#[async_trait]
pub trait Block: Send + Sync {
    /// Run the block.  All failure paths are reported as a `failed` result.
    async fn execute(&self, config: &Value, input: Value, ctx: &ExecutionContext) -> NodeResult;

    /// Whether the block has a mock branch that needs no credentials.
    fn supports_mock(&self) -> bool {
        false
    }
}

/// The implementor-facing contract.
#[async_trait]
pub trait BlockLogic: Send + Sync + 'static {
    /// Typed configuration.  Defaults belong in the `serde` attributes so
    /// they are resolved once at parse time.
    type Config: DeserializeOwned + Send + Sync;

    /// Real execution path; may reach external services.
    async fn execute_live(
        &self,
        config: &Self::Config,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<BlockOutput, BlockError>;

    /// Synthetic execution path used in `demo`/`test` mode.  Only called
    /// when [`supports_mock`](Self::supports_mock) returns `true`.
    async fn execute_mock(
        &self,
        config: &Self::Config,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<BlockOutput, BlockError> {
        self.execute_live(config, input, ctx).await
    }

    fn supports_mock(&self) -> bool {
        false
    }

    /// Top-level config keys holding templates the block expands itself.
    fn raw_config_keys(&self) -> &'static [&'static str] {
        &[]
    }
}
