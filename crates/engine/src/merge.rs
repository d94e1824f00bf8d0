//! Combining the payloads of several incoming edges into one input.
//!
//! Fan-in nodes (the merge step after parallel enrichment branches) receive
//! one payload per edge.  They are folded left to right in edge declaration
//! order with [`smart_merge`], so later edges win on scalar conflicts while
//! record lists are joined element-by-element on their `id`.

use std::collections::HashMap;

use serde_json::Value;

/// Top-level keys treated as record lists by [`smart_merge`].
pub const RECORD_KEYS: [&str; 3] = ["records", "items", "rows"];

/// Recursively merge `source` into `target`.
///
/// Objects merge key by key.  Arrays found under the same key are combined
/// (by `id` when the elements carry one, otherwise concatenated) and any
/// other value from `source` replaces the target's.  When either side is
/// not an object, `source` is returned as is.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, incoming) in source {
                let merged = match target.remove(&key) {
                    Some(existing) => merge_values(existing, incoming),
                    None => incoming,
                };
                target.insert(key, merged);
            }
            Value::Object(target)
        }
        (_, source) => source,
    }
}

fn merge_values(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Array(a), Value::Array(b)) => Value::Array(merge_arrays(a, b)),
        (target @ Value::Object(_), source @ Value::Object(_)) => deep_merge(target, source),
        (_, source) => source,
    }
}

fn merge_arrays(target: Vec<Value>, source: Vec<Value>) -> Vec<Value> {
    if target.iter().chain(&source).any(|v| id_key(v).is_some()) {
        merge_by_id(target, source)
    } else {
        let mut out = target;
        out.extend(source);
        out
    }
}

/// Identity of an element: its `id` field, serialized so `1` and `"1"`
/// stay distinct.
fn id_key(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::Null => None,
        id => Some(id.to_string()),
    }
}

/// Join two record lists on `id`.
///
/// Elements sharing an id are deep-merged in place (target position wins),
/// source elements with a new id or no id at all are appended.
pub fn merge_by_id(target: Vec<Value>, source: Vec<Value>) -> Vec<Value> {
    let mut merged = target;
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .filter_map(|(i, v)| id_key(v).map(|k| (k, i)))
        .collect();

    for item in source {
        let key = id_key(&item);
        match key.as_ref().and_then(|k| index.get(k)).copied() {
            Some(i) => {
                let existing = std::mem::take(&mut merged[i]);
                merged[i] = deep_merge(existing, item);
            }
            None => {
                if let Some(key) = key {
                    index.insert(key, merged.len());
                }
                merged.push(item);
            }
        }
    }
    merged
}

/// Merge two node outputs.
///
/// Like [`deep_merge`], except that record lists under [`RECORD_KEYS`] (or
/// two top-level arrays) are always joined with [`merge_by_id`] so records
/// enriched on different branches come back together.
pub fn smart_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target), Value::Object(mut source)) => {
            for key in RECORD_KEYS {
                let joined = match (target.get_mut(key), source.get_mut(key)) {
                    (Some(Value::Array(a)), Some(Value::Array(b))) => {
                        merge_by_id(std::mem::take(a), std::mem::take(b))
                    }
                    _ => continue,
                };
                source.remove(key);
                target.insert(key.to_owned(), Value::Array(joined));
            }
            deep_merge(Value::Object(target), Value::Object(source))
        }
        (Value::Array(a), Value::Array(b)) => Value::Array(merge_by_id(a, b)),
        (target, source) => deep_merge(target, source),
    }
}

/// Fold edge payloads, in order, into a single input value.
///
/// `null` payloads contribute nothing; no payloads at all yields `null`.
pub fn merge_inputs<I>(payloads: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    payloads
        .into_iter()
        .filter(|p| !p.is_null())
        .fold(None, |acc: Option<Value>, payload| {
            Some(match acc {
                Some(acc) => smart_merge(acc, payload),
                None => payload,
            })
        })
        .unwrap_or(Value::Null)
}
