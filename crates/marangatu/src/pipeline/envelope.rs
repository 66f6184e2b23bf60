//! Reading the portal's JSON reply envelope.
//!
//! Success is a boolean-ish flag at the top level (`exito`, or `permite` on
//! the permit check); failures carry `operacion.errores[].descripcion`.

use serde_json::Value;

/// How a success flag is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Present and truthy.
    Truthy,
    /// Present with any value, `null` excluded.
    Present,
    /// Anything except an explicit `false`.
    NotFalse,
}

/// Python-style truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn passes(json: &Value, field: &str, rule: Rule) -> bool {
    let value = json.get(field);
    match rule {
        Rule::Truthy => value.is_some_and(truthy),
        Rule::Present => value.is_some_and(|v| !v.is_null()),
        Rule::NotFalse => value != Some(&Value::Bool(false)),
    }
}

/// First error description the portal reported, if any.
pub fn first_error(json: &Value) -> Option<String> {
    json.pointer("/operacion/errores/0/descripcion")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A string field, with numbers rendered as text.
pub fn text_field(json: &Value, field: &str) -> Option<String> {
    match json.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
