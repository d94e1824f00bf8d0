//! `engine` crate — workflow models, DAG validation and layering, input
//! merging, and the execution engine.

pub mod dag;
pub mod error;
pub mod executor;
pub mod merge;
pub mod models;
pub mod report;

pub use dag::{execution_layers, validate_dag};
pub use error::EngineError;
pub use executor::{ExecutorConfig, RunOptions, WorkflowExecutor};
pub use merge::{deep_merge, merge_by_id, merge_inputs, smart_merge, RECORD_KEYS};
pub use models::{EdgeAdapter, EdgeDefinition, NodeDefinition, Workflow, DEFAULT_PORT};
pub use report::{NodeOutcome, RunReport, RunStatus, TimelineEntry, TimelineEvent};
