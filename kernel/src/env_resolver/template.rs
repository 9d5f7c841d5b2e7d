//! `${VAR}` template expansion
//!
//! Config templates and static env assignments may reference variables as
//! `${VAR}` or `${VAR:-default}`. Expansion is a single left-to-right pass:
//! an unset `${VAR}` becomes the empty string, `${VAR:-default}` falls back
//! to its literal default, and defaults are not themselves re-expanded.

use super::EnvMap;
use serde_json::Value;

/// Expand every `${VAR}` occurrence in one string
pub fn expand(input: &str, env: &EnvMap) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let token = &after[..end];
                out.push_str(&resolve_token(token, env));
                rest = &after[end + 1..];
            }
            None => {
                // Unclosed token: keep it literally, nothing to resolve
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_token(token: &str, env: &EnvMap) -> String {
    match token.split_once(":-") {
        Some((name, default)) => env
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string()),
        None => env.get(token).cloned().unwrap_or_default(),
    }
}

/// Expand every string inside a JSON value, recursing through arrays and
/// objects; keys are left untouched
pub fn expand_value(value: &Value, env: &EnvMap) -> Value {
    match value {
        Value::String(s) => Value::String(expand(s, env)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, env)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, env)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Whether any well-formed `${...}` token survives in the value
pub fn has_unresolved(value: &Value) -> bool {
    match value {
        Value::String(s) => match s.find("${") {
            Some(start) => s[start..].contains('}'),
            None => false,
        },
        Value::Array(items) => items.iter().any(has_unresolved),
        Value::Object(map) => map.values().any(has_unresolved),
        _ => false,
    }
}
