//! Block registry — maps a type key to a constructor plus metadata.
//!
//! A registry is an ordinary value built once at start-up and handed to
//! the executor; independent registries can coexist (e.g. one per test).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{Block, BlockLogic, Dispatch, RegistryError};

/// Builds a fresh block instance for one invocation.
pub type BlockConstructor = Arc<dyn Fn() -> Box<dyn Block> + Send + Sync>;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Registry key referenced by `NodeDefinition::node_type`.
    pub block_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub version: String,
    /// Filled in by the registry from the block itself.
    #[serde(default)]
    pub supports_mock: bool,
    /// A known-good config, used by the CLI's `--use-baseline`.
    #[serde(default)]
    pub baseline_config: Value,
}

impl BlockMetadata {
    pub fn new(block_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            name: name.into(),
            description: String::new(),
            category: "general".into(),
            version: "1.0.0".into(),
            supports_mock: false,
            baseline_config: Value::Null,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn baseline_config(mut self, config: Value) -> Self {
        self.baseline_config = config;
        self
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegistryEntry {
    metadata: BlockMetadata,
    constructor: BlockConstructor,
}

#[derive(Default)]
pub struct BlockRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in blocks.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        crate::builtin::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Register a raw [`Block`] constructor.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateType`] if the type key is already taken.
    pub fn register<F>(&mut self, mut metadata: BlockMetadata, constructor: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Block> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&metadata.block_type) {
            return Err(RegistryError::DuplicateType(metadata.block_type));
        }
        metadata.supports_mock = constructor().supports_mock();
        debug!(block_type = %metadata.block_type, version = %metadata.version, "registered block");
        self.entries.insert(
            metadata.block_type.clone(),
            RegistryEntry {
                metadata,
                constructor: Arc::new(constructor),
            },
        );
        Ok(())
    }

    /// Register a [`BlockLogic`], wrapped in [`Dispatch`].
    pub fn register_logic<L, F>(&mut self, metadata: BlockMetadata, constructor: F) -> Result<(), RegistryError>
    where
        L: BlockLogic,
        F: Fn() -> L + Send + Sync + 'static,
    {
        self.register(metadata, move || Box::new(Dispatch::new(constructor())) as Box<dyn Block>)
    }

    /// Construct a fresh instance of `block_type`.
    ///
    /// # Errors
    /// [`RegistryError::UnknownType`] if nothing is registered under the key.
    pub fn create(&self, block_type: &str) -> Result<Box<dyn Block>, RegistryError> {
        self.entries
            .get(block_type)
            .map(|entry| (entry.constructor)())
            .ok_or_else(|| RegistryError::UnknownType(block_type.to_owned()))
    }

    pub fn metadata(&self, block_type: &str) -> Result<&BlockMetadata, RegistryError> {
        self.entries
            .get(block_type)
            .map(|entry| &entry.metadata)
            .ok_or_else(|| RegistryError::UnknownType(block_type.to_owned()))
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.entries.contains_key(block_type)
    }

    /// All metadata, sorted by type key.
    pub fn list(&self) -> Vec<&BlockMetadata> {
        let mut all: Vec<&BlockMetadata> = self.entries.values().map(|e| &e.metadata).collect();
        all.sort_by(|a, b| a.block_type.cmp(&b.block_type));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<&str> = self.list().iter().map(|m| m.block_type.as_str()).collect();
        f.debug_struct("BlockRegistry").field("types", &types).finish()
    }
}
