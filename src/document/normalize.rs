//! Response tree → graph (§4.4).

use crate::canonical::{self, IncomingEdge, IncomingPage, IncomingPageInfo};
use crate::error::NormalizeError;
use crate::graph::Graph;
use crate::keys::{embedded_id, entity_id, field_key, KeyRegistry};
use crate::plan::args::{stringify_args_filtered, Variables};
use crate::plan::{ConnectionMode, Plan, PlanField};
use crate::value::StoredValue;
use indexmap::IndexMap;
use serde_json_bytes::Value as JsonValue;
use std::sync::Arc;

/// `{document, variables, data, rootId?}` (§4.4). `root_id` defaults to
/// `@` for queries at the call site; mutations/subscriptions pass their
/// allocated `@mutation.N`/`@subscription.N` root explicitly.
pub fn normalize(
    graph: &Arc<Graph>,
    plan: &Plan,
    vars: &Variables,
    data: &JsonValue,
    root_id: &str,
    keys: &KeyRegistry,
) -> Result<(), NormalizeError> {
    graph.batch(|g| normalize_object_fields(g, &plan.root, vars, data, root_id, "$", keys))
}

fn normalize_object_fields(
    graph: &Graph,
    fields: &[PlanField],
    vars: &Variables,
    data: &JsonValue,
    record_id: &str,
    path: &str,
    keys: &KeyRegistry,
) -> Result<(), NormalizeError> {
    let object = data.as_object().ok_or_else(|| NormalizeError::ShapeMismatch {
        path: path.to_string(),
        expected: "object",
        found: json_kind(data),
    })?;

    let typename = object.get("__typename").and_then(|v| v.as_str());

    let mut patch: IndexMap<String, StoredValue> = IndexMap::new();
    for field in fields {
        if let Some(type_condition) = &field.type_condition {
            if typename != Some(type_condition.as_str()) {
                continue;
            }
        }
        let Some(value) = object.get(field.response_key.as_str()) else {
            continue;
        };
        let field_path = format!("{path}.{}", field.response_key);
        let key = field_key(&field.field_name, Some(&field.stringify_args(vars)));

        if field.connection.is_some() {
            normalize_connection_field(graph, field, vars, value, record_id, &field_path, keys)?;
            continue;
        }

        let stored = normalize_value(graph, field, vars, value, record_id, &key, &field_path, None, keys)?;
        patch.insert(key, stored);
    }
    graph.put_record(record_id, patch);
    Ok(())
}

fn normalize_value(
    graph: &Graph,
    field: &PlanField,
    vars: &Variables,
    value: &JsonValue,
    parent_id: &str,
    field_key_str: &str,
    path: &str,
    index: Option<usize>,
    keys: &KeyRegistry,
) -> Result<StoredValue, NormalizeError> {
    if value.is_null() {
        return Ok(StoredValue::Null);
    }

    if field.is_leaf() {
        return Ok(scalar_to_stored(value));
    }

    if let Some(array) = value.as_array() {
        let mut ids = Vec::with_capacity(array.len());
        for (i, item) in array.iter().enumerate() {
            if item.is_null() {
                ids.push(None);
                continue;
            }
            let child_id = normalize_object(graph, field, vars, item, parent_id, field_key_str, path, Some(i), keys)?;
            ids.push(Some(child_id));
        }
        return Ok(StoredValue::LinkList(ids));
    }

    if value.is_object() {
        let child_id = normalize_object(graph, field, vars, value, parent_id, field_key_str, path, index, keys)?;
        return Ok(StoredValue::Link(child_id));
    }

    Err(NormalizeError::ShapeMismatch {
        path: path.to_string(),
        expected: "object",
        found: json_kind(value),
    })
}

/// Normalizes a single object value, returning the id (entity or
/// synthetic) it was written under, and recursing into its children.
fn normalize_object(
    graph: &Graph,
    field: &PlanField,
    vars: &Variables,
    value: &JsonValue,
    parent_id: &str,
    field_key_str: &str,
    path: &str,
    index: Option<usize>,
    keys: &KeyRegistry,
) -> Result<String, NormalizeError> {
    let object = value.as_object().ok_or_else(|| NormalizeError::ShapeMismatch {
        path: path.to_string(),
        expected: "object",
        found: json_kind(value),
    })?;
    let typename = object.get("__typename").and_then(|v| v.as_str());
    let Some(typename) = typename else {
        return Err(NormalizeError::MissingTypename { path: path.to_string() });
    };

    let child_id = match keys.primary_key(typename, value) {
        Some(primary_key) => entity_id(typename, &primary_key),
        None => embedded_id(parent_id, field_key_str, index),
    };

    normalize_object_fields(graph, &field.children, vars, value, &child_id, path, keys)?;
    Ok(child_id)
}

fn normalize_connection_field(
    graph: &Graph,
    field: &PlanField,
    vars: &Variables,
    value: &JsonValue,
    owner_id: &str,
    path: &str,
    keys: &KeyRegistry,
) -> Result<(), NormalizeError> {
    let meta = field.connection.as_ref().expect("connection field");
    let object = value.as_object().ok_or_else(|| NormalizeError::ShapeMismatch {
        path: path.to_string(),
        expected: "object",
        found: json_kind(value),
    })?;

    let node_field = field.child("node").or_else(|| field.child("edges").and_then(|e| e.child("node")));
    let edges_field = field.child("edges");
    let node_plan = edges_field.and_then(|e| e.child("node"));

    let mut edges = Vec::new();
    if let Some(JsonValue::Array(raw_edges)) = object.get("edges") {
        let node_plan = node_plan.or(node_field);
        for (i, raw_edge) in raw_edges.iter().enumerate() {
            let edge_object = raw_edge.as_object().ok_or_else(|| NormalizeError::ShapeMismatch {
                path: format!("{path}.edges.{i}"),
                expected: "object",
                found: json_kind(raw_edge),
            })?;
            let cursor = edge_object
                .get("cursor")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_default();
            let node_link = match (edge_object.get("node"), node_plan) {
                (Some(node_value), Some(node_plan)) if !node_value.is_null() => {
                    let node_id = normalize_object(graph, node_plan, vars, node_value, owner_id, "node", &format!("{path}.edges.{i}.node"), Some(i), keys)?;
                    StoredValue::Link(node_id)
                }
                _ => StoredValue::Null,
            };
            let mut edge_scalars = IndexMap::new();
            for (key, val) in edge_object.iter() {
                let key_str = key.as_str();
                if key_str == "cursor" || key_str == "node" {
                    continue;
                }
                edge_scalars.insert(key_str.to_string(), scalar_to_stored(val));
            }
            edges.push(IncomingEdge { cursor, node_link, edge_scalars });
        }
    }

    let page_info_obj = object.get("pageInfo").and_then(|v| v.as_object());
    let page_info = IncomingPageInfo {
        start_cursor: page_info_obj.and_then(|p| p.get("startCursor")).and_then(|v| v.as_str()).map(str::to_string),
        end_cursor: page_info_obj.and_then(|p| p.get("endCursor")).and_then(|v| v.as_str()).map(str::to_string),
        has_next_page: page_info_obj.and_then(|p| p.get("hasNextPage")).and_then(|v| v.as_bool()),
        has_previous_page: page_info_obj.and_then(|p| p.get("hasPreviousPage")).and_then(|v| v.as_bool()),
    };

    let mut connection_scalars = IndexMap::new();
    for (key, val) in object.iter() {
        let key_str = key.as_str();
        if key_str == "edges" || key_str == "pageInfo" || key_str == "__typename" {
            continue;
        }
        connection_scalars.insert(key_str.to_string(), scalar_to_stored(val));
    }

    let built_args = field.build_args(vars);
    let after = built_args.get("after").and_then(|v| v.as_str()).map(str::to_string);
    let before = built_args.get("before").and_then(|v| v.as_str()).map(str::to_string);

    if matches!(meta.mode, ConnectionMode::Page) {
        // Strict-only mode: write the strict record but never touch the
        // canonical view (§4.3 "Connection mode `page` disables canonical
        // merging").
        let strict_args = field.stringify_args(vars);
        crate::canonical::write_strict_only(
            graph,
            owner_id,
            &meta.connection_key,
            &strict_args,
            IncomingPage { edges, page_info, connection_scalars, after, before },
        );
        return Ok(());
    }

    let filter_names = meta.filter_arg_names(&field.arguments);
    let filter_args_json = stringify_args_filtered(&field.arguments, vars, |name| filter_names.contains(&name));
    let full_args_json = field.stringify_args(vars);

    canonical::write_page(
        graph,
        owner_id,
        &meta.connection_key,
        &filter_args_json,
        &full_args_json,
        IncomingPage { edges, page_info, connection_scalars, after, before },
    );
    Ok(())
}

fn scalar_to_stored(value: &JsonValue) -> StoredValue {
    if value.is_null() {
        StoredValue::Null
    } else if let Some(array) = value.as_array() {
        StoredValue::ScalarList(array.iter().map(scalar_to_stored).collect())
    } else {
        StoredValue::Scalar(value.clone())
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
