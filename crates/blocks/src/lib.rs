//! `blocks` crate — the block contract, registry, execution context and
//! built-in blocks.
//!
//! Every block, built-in or supplied by the hosting application, is
//! dispatched through the [`Block`] trait.  Most implement [`BlockLogic`]
//! and get their `Block` impl from [`Dispatch`], which owns the mock/live
//! switch, config parsing, retries and timeouts.

pub mod builtin;
pub mod condition;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod mock;
pub mod registry;
pub mod resilience;
pub mod result;
pub mod template;
pub mod traits;

pub use condition::{Condition, Operator};
pub use context::{ExecutionContext, ExecutionMode, Logger, NoopProgress, ProgressEvent, ProgressSink};
pub use dispatch::Dispatch;
pub use error::{BlockError, RegistryError};
pub use registry::{BlockConstructor, BlockMetadata, BlockRegistry};
pub use resilience::RetryPolicy;
pub use result::{BlockOutput, LogEntry, LogLevel, NodeResult, NodeStatus};
pub use traits::{Block, BlockLogic};
