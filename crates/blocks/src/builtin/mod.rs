//! Built-in blocks.
//!
//! These carry the generic shapes every pipeline needs (pass-through,
//! filtering, branching, variable publishing, per-item HTTP enrichment);
//! service-specific blocks are registered by the hosting application.

pub mod branch;
pub mod echo;
pub mod filter;
pub mod http_enrich;
pub mod set_variable;

use serde_json::{json, Map, Value};

use crate::{BlockError, BlockMetadata, BlockRegistry, RegistryError};

pub use branch::Branch;
pub use echo::Echo;
pub use filter::Filter;
pub use http_enrich::HttpEnrich;
pub use set_variable::SetVariable;

pub fn register_builtins(registry: &mut BlockRegistry) -> Result<(), RegistryError> {
    registry.register_logic(
        BlockMetadata::new("echo", "Echo")
            .description("Pass the input through unchanged")
            .category("utility"),
        || Echo,
    )?;
    registry.register_logic(
        BlockMetadata::new("filter", "Filter")
            .description("Keep the items that match a condition")
            .category("transform")
            .baseline_config(json!({
                "condition": { "field": "email", "operator": "exists" }
            })),
        || Filter,
    )?;
    registry.register_logic(
        BlockMetadata::new("branch", "Branch")
            .description("Route the input to the 'true' or 'false' port")
            .category("control")
            .baseline_config(json!({
                "condition": { "field": "score", "operator": "greater_than", "value": 50 }
            })),
        || Branch,
    )?;
    registry.register_logic(
        BlockMetadata::new("set_variable", "Set variable")
            .description("Publish values for template expansion in later blocks")
            .category("utility")
            .baseline_config(json!({ "variables": { "country": "DE" } })),
        || SetVariable,
    )?;
    registry.register_logic(
        BlockMetadata::new("http_enrich", "HTTP enrichment")
            .description("Enrich every item with the JSON returned by a templated URL")
            .category("enrichment")
            .baseline_config(json!({
                "url": "https://api.example.com/companies?domain={{ item.domain }}",
                "mode": "mock"
            })),
        || HttpEnrich,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Item-list helpers shared by the per-item blocks
// ---------------------------------------------------------------------------

/// Where a block's item list came from, so the output keeps the same shape.
pub(crate) enum ItemSource {
    /// The input itself was the array.
    Bare,
    /// The array lived under `field` of this object.
    Field(Map<String, Value>, String),
    /// A single object, processed as a one-item list.
    Single,
}

/// Extract the item list from `input`.
pub(crate) fn take_items(input: Value, field: &str) -> Result<(Vec<Value>, ItemSource), BlockError> {
    match input {
        Value::Array(items) => Ok((items, ItemSource::Bare)),
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(items)) => Ok((items, ItemSource::Field(map, field.to_owned()))),
            Some(other) => Err(BlockError::Fatal(format!(
                "input field '{field}' is not an array (found {})",
                type_name(&other)
            ))),
            None => Ok((vec![Value::Object(map)], ItemSource::Single)),
        },
        other => Err(BlockError::Fatal(format!(
            "expected an array or object input, found {}",
            type_name(&other)
        ))),
    }
}

impl ItemSource {
    pub(crate) fn rebuild(self, mut items: Vec<Value>) -> Value {
        match self {
            ItemSource::Bare => Value::Array(items),
            ItemSource::Field(mut map, field) => {
                map.insert(field, Value::Array(items));
                Value::Object(map)
            }
            ItemSource::Single => items.pop().unwrap_or(Value::Null),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn default_items_field() -> String {
    "records".into()
}
