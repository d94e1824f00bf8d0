//! Condition evaluator shared by the filter and branch blocks.
//!
//! Evaluation never fails: an unknown operator, a malformed regex or an
//! operand of the wrong type all yield `false`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// Comparison or composition operator.  Unrecognised names are kept in
/// [`Operator::Unknown`] so they can be reported instead of rejected at
/// parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    And,
    Or,
    Exists,
    NotExists,
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Regex,
    In,
    NotIn,
    Unknown(String),
}

impl From<String> for Operator {
    fn from(name: String) -> Self {
        match name.as_str() {
            "and" => Operator::And,
            "or" => Operator::Or,
            "exists" => Operator::Exists,
            "not_exists" => Operator::NotExists,
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            "regex" => Operator::Regex,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            _ => Operator::Unknown(name),
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        let name = match op {
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::Regex => "regex",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Unknown(name) => return name,
        };
        name.to_string()
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A node of a boolean expression tree.
///
/// With `conditions` present, `operator` must be `and` or `or`.  Otherwise
/// `field` is a dotted path into the data and `value` the comparison operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

impl Condition {
    pub fn leaf(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: Some(field.into()),
            operator,
            value,
            conditions: None,
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::group(Operator::And, conditions)
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::group(Operator::Or, conditions)
    }

    fn group(operator: Operator, conditions: Vec<Condition>) -> Self {
        Self {
            field: None,
            operator,
            value: Value::Null,
            conditions: Some(conditions),
        }
    }

    pub fn evaluate(&self, data: &Value) -> bool {
        evaluate(self, data)
    }
}

// ---------------------------------------------------------------------------
// Path lookup
// ---------------------------------------------------------------------------

/// Resolve a dotted path (`"contact.emails.0"`) inside `data`.
///
/// Numeric segments index into arrays.  `None` as soon as any segment is
/// missing.  An empty path resolves to `data` itself.
pub fn resolve_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub fn evaluate(condition: &Condition, data: &Value) -> bool {
    if let Some(children) = &condition.conditions {
        return match &condition.operator {
            Operator::And => children.iter().all(|c| evaluate(c, data)),
            Operator::Or => children.iter().any(|c| evaluate(c, data)),
            other => {
                warn!(operator = ?other, "composite condition requires 'and' or 'or'");
                false
            }
        };
    }

    let actual = resolve_path(data, condition.field.as_deref().unwrap_or(""));
    let expected = &condition.value;

    match &condition.operator {
        Operator::Exists => actual.is_some_and(|v| !v.is_null()),
        Operator::NotExists => actual.map_or(true, Value::is_null),
        Operator::Equals => actual.is_some_and(|v| loosely_equal(v, expected)),
        Operator::NotEquals => !actual.is_some_and(|v| loosely_equal(v, expected)),
        Operator::Contains => actual.and_then(|v| contains(v, expected)).unwrap_or(false),
        Operator::NotContains => actual
            .and_then(|v| contains(v, expected))
            .map_or(false, |found| !found),
        Operator::GreaterThan => compare(actual, expected, |a, b| a > b),
        Operator::LessThan => compare(actual, expected, |a, b| a < b),
        Operator::Regex => regex_match(actual, expected),
        Operator::In => match expected {
            Value::Array(options) => {
                actual.is_some_and(|v| options.iter().any(|o| loosely_equal(v, o)))
            }
            _ => false,
        },
        Operator::NotIn => match expected {
            Value::Array(options) => {
                !actual.is_some_and(|v| options.iter().any(|o| loosely_equal(v, o)))
            }
            _ => false,
        },
        Operator::And | Operator::Or => {
            warn!("'and'/'or' used without nested conditions");
            false
        }
        Operator::Unknown(name) => {
            warn!(operator = %name, "unknown condition operator; evaluating to false");
            false
        }
    }
}

/// JSON equality, except that numbers compare by numeric value (`1 == 1.0`).
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// `None` when the operand types do not support containment.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match (haystack, needle) {
        (Value::String(s), Value::String(sub)) => Some(s.contains(sub.as_str())),
        (Value::Array(items), needle) => Some(items.iter().any(|i| loosely_equal(i, needle))),
        _ => None,
    }
}

fn compare(actual: Option<&Value>, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(Value::as_f64), expected.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn regex_match(actual: Option<&Value>, pattern: &Value) -> bool {
    let (Some(Value::String(text)), Value::String(pattern)) = (actual, pattern) else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(err) => {
            warn!(%pattern, error = %err, "malformed regex in condition");
            false
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, op: &str, value: Value) -> Condition {
        Condition::leaf(field, Operator::from(op.to_string()), value)
    }

    #[test]
    fn exists_follows_dotted_paths() {
        let c = cond("x.y", "exists", Value::Null);
        assert!(c.evaluate(&json!({ "x": { "y": 1 } })));
        assert!(!c.evaluate(&json!({ "x": {} })));
        assert!(!c.evaluate(&json!({})));
        assert!(cond("x.y", "not_exists", Value::Null).evaluate(&json!({ "x": {} })));
    }

    #[test]
    fn path_indexes_into_arrays() {
        let data = json!({ "emails": ["a@x.io", "b@x.io"] });
        assert_eq!(resolve_path(&data, "emails.1"), Some(&json!("b@x.io")));
        assert_eq!(resolve_path(&data, "emails.7"), None);
        assert_eq!(resolve_path(&data, ""), Some(&data));
    }

    #[test]
    fn equality_treats_integers_and_floats_alike() {
        let data = json!({ "score": 3 });
        assert!(cond("score", "equals", json!(3.0)).evaluate(&data));
        assert!(cond("score", "not_equals", json!(4)).evaluate(&data));
        assert!(!cond("score", "equals", json!("3")).evaluate(&data));
    }

    #[test]
    fn contains_handles_strings_and_arrays() {
        let data = json!({ "title": "Head of Sales", "tags": ["b2b", "saas"] });
        assert!(cond("title", "contains", json!("Sales")).evaluate(&data));
        assert!(cond("tags", "contains", json!("saas")).evaluate(&data));
        assert!(cond("tags", "not_contains", json!("b2c")).evaluate(&data));
        // Wrong operand type fails closed in both directions.
        assert!(!cond("title", "contains", json!(1)).evaluate(&data));
        assert!(!cond("missing", "not_contains", json!("x")).evaluate(&data));
    }

    #[test]
    fn numeric_comparisons_reject_non_numbers() {
        let data = json!({ "n": 10, "s": "10" });
        assert!(cond("n", "greater_than", json!(5)).evaluate(&data));
        assert!(cond("n", "less_than", json!(10.5)).evaluate(&data));
        assert!(!cond("s", "greater_than", json!(5)).evaluate(&data));
        assert!(!cond("n", "greater_than", json!("5")).evaluate(&data));
    }

    #[test]
    fn regex_never_panics() {
        let data = json!({ "email": "jane@acme.io", "n": 1 });
        assert!(cond("email", "regex", json!(r"@acme\.io$")).evaluate(&data));
        assert!(!cond("email", "regex", json!("(unclosed")).evaluate(&data));
        assert!(!cond("n", "regex", json!("1")).evaluate(&data));
    }

    #[test]
    fn membership_requires_array_operand() {
        let data = json!({ "country": "DE" });
        assert!(cond("country", "in", json!(["DE", "AT"])).evaluate(&data));
        assert!(cond("country", "not_in", json!(["FR"])).evaluate(&data));
        assert!(!cond("country", "in", json!("DE")).evaluate(&data));
        assert!(!cond("country", "not_in", json!("FR")).evaluate(&data));
    }

    #[test]
    fn unknown_operator_is_false() {
        let c = cond("x", "approximately", json!(1));
        assert_eq!(c.operator, Operator::Unknown("approximately".into()));
        assert!(!c.evaluate(&json!({ "x": 1 })));
    }

    #[test]
    fn nested_and_or_composition() {
        let data = json!({ "country": "DE", "employees": 120 });
        let c = Condition::all(vec![
            cond("country", "equals", json!("DE")),
            Condition::any(vec![
                cond("employees", "greater_than", json!(500)),
                cond("employees", "greater_than", json!(100)),
            ]),
        ]);
        assert!(c.evaluate(&data));

        let bad_group = Condition {
            operator: Operator::Equals,
            ..Condition::all(vec![])
        };
        assert!(!bad_group.evaluate(&data));
    }

    #[test]
    fn deserialises_from_workflow_json() {
        let c: Condition = serde_json::from_value(json!({
            "operator": "or",
            "conditions": [
                { "field": "a", "operator": "exists" },
                { "field": "b", "operator": "equals", "value": 2 }
            ]
        }))
        .unwrap();
        assert!(c.evaluate(&json!({ "b": 2 })));
        assert!(!c.evaluate(&json!({ "b": 3 })));
    }
}
