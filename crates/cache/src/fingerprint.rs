//! Order-independent cache keys for JSON request descriptions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::Value;

/// Hash a JSON request into a stable 16-hex-digit key.
///
/// Object keys are sorted before hashing, so `{"a":1,"b":2}` and
/// `{"b":2,"a":1}` produce the same key.  Array order is significant.
pub fn fingerprint(request: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    hash_canonical(request, &mut hasher);
    format!("{:016x}", hasher.finish())
}

/// [`fingerprint`] prefixed with a namespace, e.g. `"http_enrich:…"`, so
/// different block types sharing one cache cannot collide.
pub fn fingerprint_with(namespace: &str, request: &Value) -> String {
    format!("{namespace}:{}", fingerprint(request))
}

fn hash_canonical<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_canonical(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(state);
                hash_canonical(&map[key.as_str()], state);
            }
        }
    }
}
