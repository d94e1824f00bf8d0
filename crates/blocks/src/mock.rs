//! `MockBlock` — a test double for [`Block`].
//!
//! Useful in unit and integration tests where a real block implementation
//! is either unavailable or irrelevant.  Clones share their call log, so a
//! registry constructor can hand out fresh clones while the test keeps one
//! to inspect afterwards.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Block, BlockMetadata, BlockRegistry, ExecutionContext, NodeResult, RegistryError};

/// Behaviour injected into `MockBlock` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value, tagged with the block's name.
    ReturnValue(Value),
    /// Return the input unchanged.
    Echo,
    /// Report a failed result with this message.
    Fail(String),
    /// Panic inside `execute`.
    Panic(String),
}

/// A mock block that records every input it receives and returns a
/// programmer-specified result.
#[derive(Debug, Clone)]
pub struct MockBlock {
    /// Label used in test assertions.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// Simulated latency before responding.
    pub delay: Option<Duration>,
    /// Variables published into the context on every run.
    pub publishes: Vec<(String, Value)>,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl MockBlock {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            delay: None,
            publishes: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock that always succeeds with `{"node": name, ..value}`.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    pub fn echoing(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Echo)
    }

    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Fail(msg.into()))
    }

    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Panic(msg.into()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn publishing(mut self, name: impl Into<String>, value: Value) -> Self {
        self.publishes.push((name.into(), value));
        self
    }

    /// Register clones of this mock under `block_type`.
    pub fn register_as(&self, registry: &mut BlockRegistry, block_type: &str) -> Result<(), RegistryError> {
        let mock = self.clone();
        registry.register(
            BlockMetadata::new(block_type, format!("mock {}", self.name)).category("test"),
            move || Box::new(mock.clone()),
        )
    }

    /// Number of times this block (or any clone) has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// All inputs seen, in call order.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Block for MockBlock {
    async fn execute(&self, _config: &Value, input: Value, ctx: &ExecutionContext) -> NodeResult {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        for (name, value) in &self.publishes {
            ctx.set_variable(name.clone(), value.clone());
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Merge the block's own output field so tests can trace the
                // data flowing through the pipeline.
                let mut out = json!({ "node": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                NodeResult::completed(out)
            }
            MockBehaviour::Echo => NodeResult::completed(input),
            MockBehaviour::Fail(msg) => NodeResult::failed(msg.clone()),
            MockBehaviour::Panic(msg) => panic!("{}", msg),
        }
    }
}
