//! `{{dotted.path}}` interpolation against the execution context.
//!
//! All template handling funnels through [`interpolate`] so the
//! placeholder syntax can be swapped without touching engine control
//! flow. Interpolation recurses through nested maps but not arrays;
//! arrays are passed through verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid placeholder pattern"));

/// Resolve a dot path against a JSON context.
///
/// Returns `None` when any segment is missing or the walk hits a
/// non-object value.
pub fn resolve_path(context: &Value, path: &str) -> Option<Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// String form of a resolved value.
///
/// Strings render without quotes, `null` renders empty, and compound
/// values render as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Replace every `{{dotted.path}}` placeholder with the string form of
/// the resolved value; unresolved paths degrade to the empty string.
/// Strings without placeholders are returned unchanged.
pub fn interpolate(template: &str, context: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |captures: &regex::Captures<'_>| {
            let path = &captures[1];
            resolve_path(context, path).as_ref().map(value_to_string).unwrap_or_default()
        })
        .into_owned()
}

/// Interpolate every string inside a JSON value.
///
/// Recurses through nested maps; arrays are passed through verbatim (a
/// deliberate scope boundary inherited from the workflow format).
pub fn interpolate_value(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(template) => Value::String(interpolate(template, context)),
        Value::Object(map) => Value::Object(
            map.iter().map(|(key, inner)| (key.clone(), interpolate_value(inner, context))).collect(),
        ),
        other => other.clone(),
    }
}
