//! Argument resolution and stable serialization (§3.1, §4.1).

use crate::ast::{Argument, Value as AstValue};
use indexmap::IndexMap;
use serde_json_bytes::{ByteString, Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;

/// Variables bound for one compile/materialize call.
pub type Variables = HashMap<String, JsonValue>;

/// The four pagination argument names recognized everywhere (§4.1).
pub const PAGINATION_ARGS: [&str; 4] = ["first", "last", "after", "before"];

pub fn is_pagination_arg(name: &str) -> bool {
    PAGINATION_ARGS.contains(&name)
}

/// Resolves one argument-value template against bound variables. Missing
/// variables resolve to `null` (§3.1, §4.1) rather than erroring.
pub fn resolve_value(template: &AstValue, vars: &Variables) -> JsonValue {
    match template {
        AstValue::Variable(name) => vars.get(name).cloned().unwrap_or(JsonValue::Null),
        AstValue::Int(n) => JsonValue::Number((*n).into()),
        AstValue::Float(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        AstValue::String(s) => JsonValue::String(ByteString::from(s.clone())),
        AstValue::Boolean(b) => JsonValue::Bool(*b),
        AstValue::Null => JsonValue::Null,
        AstValue::Enum(e) => JsonValue::String(ByteString::from(e.clone())),
        AstValue::List(items) => {
            JsonValue::Array(items.iter().map(|v| resolve_value(v, vars)).collect())
        }
        AstValue::Object(map) => {
            let mut out = JsonMap::new();
            for (key, value) in map {
                out.insert(ByteString::from(key.clone()), resolve_value(value, vars));
            }
            JsonValue::Object(out)
        }
    }
}

/// Builds the runtime argument map for a field, in declaration order
/// (used by normalize/materialize to drive wire-shaped argument values;
/// see [`stringify_args`] for the key-sorted serialization used in keys).
pub fn build_args(arguments: &[Argument], vars: &Variables) -> IndexMap<String, JsonValue> {
    let mut out = IndexMap::new();
    for arg in arguments {
        out.insert(arg.name.clone(), resolve_value(&arg.value, vars));
    }
    out
}

/// Serializes a subset of a field's arguments (filtered by `include`) into
/// the sorted-key JSON text used in field keys and connection keys (§3.1).
/// Returns an empty string when no arguments are included, so callers can
/// pass the result straight to [`crate::keys::field_key`].
pub fn stringify_args_filtered(
    arguments: &[Argument],
    vars: &Variables,
    include: impl Fn(&str) -> bool,
) -> String {
    let mut entries: Vec<(&str, JsonValue)> = arguments
        .iter()
        .filter(|a| include(&a.name))
        .map(|a| (a.name.as_str(), resolve_value(&a.value, vars)))
        .collect();
    if entries.is_empty() {
        return String::new();
    }
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let mut map = JsonMap::new();
    for (name, value) in entries {
        map.insert(ByteString::from(name.to_string()), value);
    }
    JsonValue::Object(map).to_string()
}

/// Serializes every argument on a field, sorted by key (§3.1's
/// `stringifyArgs`).
pub fn stringify_args(arguments: &[Argument], vars: &Variables) -> String {
    stringify_args_filtered(arguments, vars, |_| true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Document;

    fn args_of(source: &str) -> Vec<Argument> {
        let doc = Document::parse(source).unwrap();
        let op = &doc.operations[0];
        match &op.selection_set[0] {
            crate::ast::Selection::Field(f) => f.arguments.clone(),
            _ => panic!("expected field"),
        }
    }

    #[test]
    fn stringify_sorts_keys_and_substitutes_variables() {
        let args = args_of("query Q($b: Int) { f(b: $b, a: 1) }");
        let mut vars = Variables::new();
        vars.insert("b".to_string(), JsonValue::Number(2.into()));
        assert_eq!(stringify_args(&args, &vars), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn missing_variable_serializes_as_null() {
        let args = args_of("query Q($b: Int) { f(b: $b) }");
        let vars = Variables::new();
        assert_eq!(stringify_args(&args, &vars), r#"{"b":null}"#);
    }

    #[test]
    fn filtered_excludes_pagination_args() {
        let args = args_of("query Q { f(first: 10, tag: \"rust\") }");
        let vars = Variables::new();
        let out = stringify_args_filtered(&args, &vars, |name| !is_pagination_arg(name));
        assert_eq!(out, r#"{"tag":"rust"}"#);
    }
}
