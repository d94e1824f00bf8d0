//! Template expansion for block configs.
//!
//! String values containing `{{ … }}` or `{% … %}` are rendered with
//! minijinja.  Undefined variables are an error, not an empty string, so a
//! typo in a config surfaces as `InvalidConfig` instead of a silently wrong
//! request.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::BlockError;

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

fn is_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

/// Render a single template string against `scope`.
pub fn render_str<S: Serialize>(template: &str, scope: &S) -> Result<String, BlockError> {
    if !is_template(template) {
        return Ok(template.to_owned());
    }
    environment()
        .render_str(template, scope)
        .map_err(|e| BlockError::InvalidConfig(format!("template '{template}': {e}")))
}

/// Render every templated string inside `config`.
///
/// Top-level keys listed in `raw_keys` are left untouched; blocks use this
/// for templates they expand themselves (e.g. once per item).
pub fn render_config<S: Serialize>(
    config: &Value,
    raw_keys: &[&str],
    scope: &S,
) -> Result<Value, BlockError> {
    match config {
        Value::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, value) in map {
                let value = if raw_keys.contains(&key.as_str()) {
                    value.clone()
                } else {
                    render_value(value, scope)?
                };
                rendered.insert(key.clone(), value);
            }
            Ok(Value::Object(rendered))
        }
        other => render_value(other, scope),
    }
}

fn render_value<S: Serialize>(value: &Value, scope: &S) -> Result<Value, BlockError> {
    Ok(match value {
        Value::String(s) if is_template(s) => Value::String(render_str(s, scope)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, scope))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, value) in map {
                rendered.insert(key.clone(), render_value(value, scope)?);
            }
            Value::Object(rendered)
        }
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_strings_from_scope() {
        let scope = json!({ "vars": { "country": "DE" }, "input": { "n": 2 } });
        let config = json!({
            "query": "companies in {{ vars.country }}",
            "nested": { "list": ["{{ input.n * 2 }}", 7] },
            "plain": "untouched",
        });

        let out = render_config(&config, &[], &scope).unwrap();
        assert_eq!(out["query"], "companies in DE");
        assert_eq!(out["nested"]["list"], json!(["4", 7]));
        assert_eq!(out["plain"], "untouched");
    }

    #[test]
    fn raw_keys_are_skipped() {
        let scope = json!({ "vars": {} });
        let config = json!({ "url": "https://x/{{ item.domain }}" });
        let out = render_config(&config, &["url"], &scope).unwrap();
        assert_eq!(out["url"], "https://x/{{ item.domain }}");
    }

    #[test]
    fn undefined_variables_are_config_errors() {
        let err = render_str("{{ vars.nope }}", &json!({ "vars": {} })).unwrap_err();
        assert!(matches!(err, BlockError::InvalidConfig(_)));
    }
}
