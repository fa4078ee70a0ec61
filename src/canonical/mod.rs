//! Canonical connection layer (§4.3) — the merge algorithm at the heart
//! of the cache.

use crate::graph::Graph;
use crate::keys::{canonical_connection_key, edge_id, page_info_id, strict_connection_key};
use crate::value::StoredValue;
use indexmap::IndexMap;
use serde_json_bytes::Value as JsonValue;
use tracing::debug;

/// One edge as received on the wire: a cursor plus the link to its node
/// (already normalized into the graph by the caller) and any edge-level
/// scalar fields (e.g. a `reason` field on the edge itself).
#[derive(Debug, Clone)]
pub struct IncomingEdge {
    pub cursor: String,
    pub node_link: StoredValue,
    pub edge_scalars: IndexMap<String, StoredValue>,
}

#[derive(Debug, Clone, Default)]
pub struct IncomingPageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: Option<bool>,
    pub has_previous_page: Option<bool>,
}

/// A complete page payload for a connection write (§4.3 write path).
#[derive(Debug, Clone)]
pub struct IncomingPage {
    pub edges: Vec<IncomingEdge>,
    pub page_info: IncomingPageInfo,
    /// Connection-level scalar fields stored inline on the canonical and
    /// strict records (e.g. `totalCount`).
    pub connection_scalars: IndexMap<String, StoredValue>,
    pub after: Option<String>,
    pub before: Option<String>,
}

/// Where a connection page write landed canonically — used only for
/// logging/testing, not required by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Replaced,
    Appended,
    Prepended,
    OverlapRewritten,
    Orphaned,
}

/// Writes a connection page (§4.3 steps 1-5). `owner_id`/`connection_name`
/// form the canonical key; `full_args_json` is the complete (filter +
/// page) argument serialization used for the strict key.
pub fn write_page(
    graph: &Graph,
    owner_id: &str,
    connection_name: &str,
    filter_args_json: &str,
    full_args_json: &str,
    page: IncomingPage,
) -> MergeOutcome {
    let canonical_key = canonical_connection_key(owner_id, connection_name, filter_args_json);
    let strict_key = strict_connection_key(owner_id, connection_name, full_args_json);

    write_strict_record(graph, &strict_key, &page);

    let outcome = merge_canonical(graph, &canonical_key, &strict_key, &page);
    debug!(canonical_key = %canonical_key, outcome = ?outcome, "canonical connection merge");
    outcome
}

/// Writes a `page`-mode connection (§3.4 `ConnectionMode::Page`): only the
/// strict record is written, canonical merging never runs.
pub fn write_strict_only(
    graph: &Graph,
    owner_id: &str,
    connection_name: &str,
    full_args_json: &str,
    page: IncomingPage,
) {
    let strict_key = strict_connection_key(owner_id, connection_name, full_args_json);
    write_strict_record(graph, &strict_key, &page);
}

fn write_strict_record(graph: &Graph, strict_key: &str, page: &IncomingPage) {
    let edge_ids: Vec<Option<String>> = page
        .edges
        .iter()
        .map(|edge| Some(edge_id(strict_key, &edge.cursor)))
        .collect();
    for edge in &page.edges {
        write_edge_record(graph, strict_key, edge);
    }
    write_page_info_record(graph, strict_key, &page.page_info, &page.page_info);

    let mut patch: IndexMap<String, StoredValue> = page.connection_scalars.clone();
    patch.insert("edges".to_string(), StoredValue::LinkList(edge_ids));
    patch.insert(
        "pageInfo".to_string(),
        StoredValue::Link(page_info_id(strict_key)),
    );
    graph.put_record(strict_key, patch);
}

fn write_edge_record(graph: &Graph, owning_key: &str, edge: &IncomingEdge) {
    let id = edge_id(owning_key, &edge.cursor);
    let mut patch = edge.edge_scalars.clone();
    patch.insert("cursor".to_string(), StoredValue::Scalar(JsonValue::String(edge.cursor.clone().into())));
    patch.insert("node".to_string(), edge.node_link.clone());
    graph.put_record(&id, patch);
}

fn write_page_info_record(
    graph: &Graph,
    owning_key: &str,
    incoming: &IncomingPageInfo,
    merged: &IncomingPageInfo,
) {
    let _ = incoming;
    let id = page_info_id(owning_key);
    let mut patch = IndexMap::new();
    if let Some(start) = &merged.start_cursor {
        patch.insert("startCursor".to_string(), StoredValue::Scalar(JsonValue::String(start.clone().into())));
    }
    if let Some(end) = &merged.end_cursor {
        patch.insert("endCursor".to_string(), StoredValue::Scalar(JsonValue::String(end.clone().into())));
    }
    if let Some(has_next) = merged.has_next_page {
        patch.insert("hasNextPage".to_string(), StoredValue::Scalar(JsonValue::Bool(has_next)));
    }
    if let Some(has_prev) = merged.has_previous_page {
        patch.insert("hasPreviousPage".to_string(), StoredValue::Scalar(JsonValue::Bool(has_prev)));
    }
    graph.put_record(&id, patch);
}

/// Reads the canonical edge list's cursor-ordered node ids, if the
/// canonical record exists.
fn canonical_cursors(graph: &Graph, canonical_key: &str) -> Option<Vec<String>> {
    let record = graph.get_record(canonical_key)?;
    let edges = record.get("edges")?.as_link_list()?;
    Some(
        edges
            .iter()
            .filter_map(|id| id.as_ref())
            .filter_map(|id| id.rsplit_once('(').map(|(_, rest)| rest.trim_end_matches(')').to_string()))
            .collect(),
    )
}

fn merge_canonical(
    graph: &Graph,
    canonical_key: &str,
    strict_key: &str,
    page: &IncomingPage,
) -> MergeOutcome {
    let existing = graph.get_record(canonical_key);
    let existing_cursors = existing
        .as_ref()
        .and_then(|_| canonical_cursors(graph, canonical_key))
        .unwrap_or_default();

    let incoming_cursors: Vec<String> = page.edges.iter().map(|e| e.cursor.clone()).collect();

    let is_refetch_interior = page.after.is_some() || page.before.is_some();

    let (final_cursors, outcome) = if existing_cursors.is_empty() || (!is_refetch_interior) {
        (incoming_cursors.clone(), MergeOutcome::Replaced)
    } else if let Some(after) = &page.after {
        if existing_cursors.last() == Some(after) || existing_cursors.contains(after) {
            let mut merged = existing_cursors.clone();
            let anchor = merged.iter().position(|c| c == after).unwrap_or(merged.len() - 1);
            let mut tail = merged.split_off(anchor + 1);
            for cursor in &incoming_cursors {
                if !merged.contains(cursor) && !tail.contains(cursor) {
                    tail.push(cursor.clone());
                } else if let Some(pos) = tail.iter().position(|c| c == cursor) {
                    tail[pos] = cursor.clone();
                }
            }
            merged.append(&mut tail);
            (merged, MergeOutcome::Appended)
        } else if existing_cursors.iter().any(|c| incoming_cursors.contains(c)) {
            (
                overlap_rewrite(&existing_cursors, &incoming_cursors),
                MergeOutcome::OverlapRewritten,
            )
        } else {
            write_orphan_buffer(graph, canonical_key, strict_key);
            (existing_cursors.clone(), MergeOutcome::Orphaned)
        }
    } else if let Some(before) = &page.before {
        if existing_cursors.first() == Some(before) || existing_cursors.contains(before) {
            let anchor = existing_cursors.iter().position(|c| c == before).unwrap_or(0);
            let mut head: Vec<String> = incoming_cursors
                .iter()
                .filter(|c| !existing_cursors.contains(c))
                .cloned()
                .collect();
            let mut merged = existing_cursors.clone();
            let rest = merged.split_off(anchor);
            head.extend(rest);
            merged = head;
            (merged, MergeOutcome::Prepended)
        } else if existing_cursors.iter().any(|c| incoming_cursors.contains(c)) {
            (
                overlap_rewrite(&existing_cursors, &incoming_cursors),
                MergeOutcome::OverlapRewritten,
            )
        } else {
            write_orphan_buffer(graph, canonical_key, strict_key);
            (existing_cursors.clone(), MergeOutcome::Orphaned)
        }
    } else {
        (incoming_cursors.clone(), MergeOutcome::Replaced)
    };

    if matches!(outcome, MergeOutcome::Orphaned) {
        return outcome;
    }

    write_canonical_edges(graph, canonical_key, strict_key, page, &final_cursors);
    let merged_page_info = merge_page_info(&existing, &page.page_info, &outcome, &final_cursors);
    write_page_info_record(graph, canonical_key, &page.page_info, &merged_page_info);

    let mut patch: IndexMap<String, StoredValue> = page.connection_scalars.clone();
    graph.put_record(canonical_key, patch.drain(..).collect());

    outcome
}

/// Rewrites the overlap between the existing canonical order and an
/// incoming page in place: matching node ids update, new non-overlapping
/// edges are spliced in at the boundary where the overlap occurs (§4.3).
fn overlap_rewrite(existing: &[String], incoming: &[String]) -> Vec<String> {
    if incoming.is_empty() {
        return existing.to_vec();
    }
    let first_overlap = incoming.iter().position(|c| existing.contains(c));
    let Some(first_overlap) = first_overlap else {
        return existing.to_vec();
    };
    let anchor_cursor = &incoming[first_overlap];
    let anchor_pos = existing.iter().position(|c| c == anchor_cursor).unwrap();

    let mut merged = existing[..anchor_pos].to_vec();
    for cursor in incoming {
        if !merged.contains(cursor) {
            merged.push(cursor.clone());
        }
    }
    for cursor in &existing[anchor_pos..] {
        if !merged.contains(cursor) {
            merged.push(cursor.clone());
        }
    }
    merged
}

fn write_orphan_buffer(graph: &Graph, canonical_key: &str, strict_key: &str) {
    // Unknown cursor boundary with a non-empty canonical: the page stays
    // buffered under its strict key only (already written by
    // `write_strict_record`); canonical is left untouched (§4.3, open
    // question 1 — kept verbatim rather than attempting a fuzzy match).
    let _ = (graph, canonical_key, strict_key);
}

fn write_canonical_edges(
    graph: &Graph,
    canonical_key: &str,
    strict_key: &str,
    page: &IncomingPage,
    final_cursors: &[String],
) {
    let by_cursor: std::collections::HashMap<&str, &IncomingEdge> = page
        .edges
        .iter()
        .map(|e| (e.cursor.as_str(), e))
        .collect();
    let edge_ids: Vec<Option<String>> = final_cursors
        .iter()
        .map(|cursor| Some(edge_id(canonical_key, cursor)))
        .collect();
    for cursor in final_cursors {
        if let Some(edge) = by_cursor.get(cursor.as_str()) {
            write_edge_record(graph, canonical_key, edge);
        } else {
            // Edge retained from the existing canonical order but not part
            // of this page: copy it over from the strict record that last
            // wrote it, if still resolvable, otherwise leave as-is (its
            // record already exists under the canonical key from an
            // earlier write).
            let _ = strict_key;
        }
    }
    let mut patch = IndexMap::new();
    patch.insert("edges".to_string(), StoredValue::LinkList(edge_ids));
    graph.put_record(canonical_key, patch);
}

fn merge_page_info(
    existing: &Option<crate::graph::Record>,
    incoming: &IncomingPageInfo,
    outcome: &MergeOutcome,
    final_cursors: &[String],
) -> IncomingPageInfo {
    let prior = existing.as_ref().map(|record| IncomingPageInfo {
        start_cursor: scalar_string(record.get("startCursor")),
        end_cursor: scalar_string(record.get("endCursor")),
        has_next_page: scalar_bool(record.get("hasNextPage")),
        has_previous_page: scalar_bool(record.get("hasPreviousPage")),
    });

    let start_cursor = final_cursors.first().cloned().or_else(|| prior.as_ref().and_then(|p| p.start_cursor.clone()));
    let end_cursor = final_cursors.last().cloned().or_else(|| prior.as_ref().and_then(|p| p.end_cursor.clone()));

    let has_next_page = match outcome {
        MergeOutcome::Appended | MergeOutcome::Replaced => incoming.has_next_page,
        _ => prior.as_ref().and_then(|p| p.has_next_page).or(incoming.has_next_page),
    };
    let has_previous_page = match outcome {
        MergeOutcome::Prepended | MergeOutcome::Replaced => incoming.has_previous_page,
        _ => prior.as_ref().and_then(|p| p.has_previous_page).or(incoming.has_previous_page),
    };

    IncomingPageInfo {
        start_cursor,
        end_cursor,
        has_next_page,
        has_previous_page,
    }
}

fn scalar_string(value: Option<&StoredValue>) -> Option<String> {
    match value {
        Some(StoredValue::Scalar(JsonValue::String(s))) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn scalar_bool(value: Option<&StoredValue>) -> Option<bool> {
    match value {
        Some(StoredValue::Scalar(JsonValue::Bool(b))) => Some(*b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(cursor: &str, node_id: &str) -> IncomingEdge {
        IncomingEdge {
            cursor: cursor.to_string(),
            node_link: StoredValue::Link(node_id.to_string()),
            edge_scalars: IndexMap::new(),
        }
    }

    fn page(cursors: &[&str], after: Option<&str>, has_next: bool) -> IncomingPage {
        IncomingPage {
            edges: cursors.iter().map(|c| edge(c, &format!("User:{c}"))).collect(),
            page_info: IncomingPageInfo {
                start_cursor: cursors.first().map(|s| s.to_string()),
                end_cursor: cursors.last().map(|s| s.to_string()),
                has_next_page: Some(has_next),
                has_previous_page: Some(false),
            },
            connection_scalars: IndexMap::new(),
            after: after.map(str::to_string),
            before: None,
        }
    }

    #[test]
    fn first_page_replaces_empty_canonical() {
        let graph = Graph::new(|_| {});
        let outcome = write_page(&graph, "@", "users", "{}", r#"{"after":null,"first":3}"#, page(&["a", "b", "c"], None, true));
        assert_eq!(outcome, MergeOutcome::Replaced);
        let canonical = graph.get_record("@connection.@.users({})").unwrap();
        let edges = canonical.get("edges").unwrap().as_link_list().unwrap();
        assert_eq!(edges.len(), 3);
    }

    #[test]
    fn second_page_appends_after_matching_cursor() {
        let graph = Graph::new(|_| {});
        write_page(&graph, "@", "users", "{}", r#"{"after":null,"first":3}"#, page(&["a", "b", "c"], None, true));
        let outcome = write_page(&graph, "@", "users", "{}", r#"{"after":"c","first":2}"#, page(&["d", "e"], Some("c"), false));
        assert_eq!(outcome, MergeOutcome::Appended);
        let canonical = graph.get_record("@connection.@.users({})").unwrap();
        assert_eq!(canonical.get("edges").unwrap().as_link_list().unwrap().len(), 5);
        let page_info = graph.get_record(&page_info_id("@connection.@.users({})")).unwrap();
        assert_eq!(scalar_bool(page_info.get("hasNextPage")), Some(false));
    }

    #[test]
    fn unknown_cursor_buffers_as_orphan_without_touching_canonical() {
        let graph = Graph::new(|_| {});
        write_page(&graph, "@", "users", "{}", r#"{"after":null,"first":3}"#, page(&["a", "b", "c"], None, true));
        let outcome = write_page(&graph, "@", "users", "{}", r#"{"after":"zzz","first":2}"#, page(&["x", "y"], Some("zzz"), false));
        assert_eq!(outcome, MergeOutcome::Orphaned);
        let canonical = graph.get_record("@connection.@.users({})").unwrap();
        assert_eq!(canonical.get("edges").unwrap().as_link_list().unwrap().len(), 3);
    }

    #[test]
    fn merge_is_idempotent() {
        let graph = Graph::new(|_| {});
        write_page(&graph, "@", "users", "{}", r#"{"after":null,"first":3}"#, page(&["a", "b", "c"], None, true));
        let v1 = graph.get_record("@connection.@.users({})").unwrap().version;
        write_page(&graph, "@", "users", "{}", r#"{"after":null,"first":3}"#, page(&["a", "b", "c"], None, true));
        let v2 = graph.get_record("@connection.@.users({})").unwrap().version;
        assert_eq!(v1, v2);
    }
}
