//! Graph → response tree (§4.5).

use crate::graph::{Graph, Record};
use crate::keys::{canonical_connection_key, field_key, page_info_id, strict_connection_key};
use crate::plan::args::{stringify_args_filtered, Variables};
use crate::plan::{ConnectionMode, Plan, PlanField, SignatureMode};
use crate::value::StoredValue;
use serde_json_bytes::{ByteString, Map as JsonMap, Value as JsonValue};
use std::collections::HashSet;

const PRIME: u64 = 0x100000001b3;

/// Folds a child's recursive `__version` into a running parent version.
/// Order-sensitive (unlike [`Reader::fingerprint`]'s order-independent
/// dependency hash): a connection's edges are ordered, so two reads that
/// differ only in edge order must not collide.
fn mix(acc: u64, child: u64) -> u64 {
    acc.wrapping_mul(PRIME).wrapping_add(child.wrapping_add(1))
}

/// `__version` is embedded as a JSON number, which `serde_json_bytes`
/// stores with `i64` precision; mask off the sign bit so the folded hash
/// always displays as a positive number (§4.5: "identical inputs produce
/// identical root versions").
fn to_json_version(version: u64) -> JsonValue {
    JsonValue::Number(((version & (i64::MAX as u64)) as i64).into())
}

/// What materialize could assemble for the requested plan (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeSource {
    /// Every field the plan required was present.
    Complete,
    /// The root resolved but at least one required field was missing.
    Partial,
    /// The root record itself could not be resolved.
    None,
}

/// Whether the strict and canonical layers each had every required field
/// present, plus the signature each layer resolved to (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeOk {
    pub strict: bool,
    pub canonical: bool,
    pub strict_signature: String,
    pub canonical_signature: String,
}

#[derive(Debug, Clone)]
pub struct MaterializeOutcome {
    pub data: Option<JsonValue>,
    pub source: MaterializeSource,
    pub ok: MaterializeOk,
    /// Every record id this read touched, keyed off for watcher
    /// invalidation and result-cache dependency tracking (§4.6, §4.7).
    pub dependencies: HashSet<String>,
    /// 64-bit rolling hash of `(id, version)` pairs over `dependencies`,
    /// used as the cheap `__version` fingerprint (§4.5, §4.6).
    pub fingerprint: u64,
    /// `true` when this outcome was served from the result cache rather
    /// than freshly assembled (§4.5 invariant 2).
    pub hot: bool,
}

struct Reader<'a> {
    graph: &'a Graph,
    vars: &'a Variables,
    mode: SignatureMode,
    dependencies: HashSet<String>,
    missing: bool,
    missing_strict: bool,
    missing_canonical: bool,
    /// When set, every JSON object written into `data` gets a `__version`
    /// key folded from its own record's version and its children's.
    embed_version: bool,
}

/// `materialize(plan, vars, rootId, mode, fingerprint)` (§4.5): a
/// post-order read of the plan against the graph, collecting dependencies
/// and a version fingerprint alongside the assembled data. `fingerprint`
/// additionally gates whether every object in `data` gets a recursive
/// `__version` key; the aggregate [`MaterializeOutcome::fingerprint`] hash
/// used for result-cache keys and watcher change-detection is always
/// computed regardless.
pub fn materialize(
    graph: &Graph,
    plan: &Plan,
    vars: &Variables,
    root_id: &str,
    mode: SignatureMode,
    fingerprint: bool,
) -> MaterializeOutcome {
    let strict_signature = plan.make_signature(SignatureMode::Strict, vars);
    let canonical_signature = plan.make_signature(SignatureMode::Canonical, vars);

    let mut reader = Reader {
        graph,
        vars,
        mode,
        dependencies: HashSet::new(),
        missing: false,
        missing_strict: false,
        missing_canonical: false,
        embed_version: fingerprint,
    };

    let Some(record) = graph.get_record(root_id) else {
        return MaterializeOutcome {
            data: None,
            source: MaterializeSource::None,
            ok: MaterializeOk {
                strict: false,
                canonical: false,
                strict_signature,
                canonical_signature,
            },
            dependencies: HashSet::new(),
            fingerprint: 0,
            hot: false,
        };
    };
    reader.dependencies.insert(root_id.to_string());

    let (data, _root_version) = reader.read_object_fields(&plan.root, root_id, Some(&record));
    let result_fingerprint = reader.fingerprint();
    let source = if reader.missing { MaterializeSource::Partial } else { MaterializeSource::Complete };

    MaterializeOutcome {
        data: Some(JsonValue::Object(data)),
        source,
        ok: MaterializeOk {
            strict: !reader.missing_strict,
            canonical: !reader.missing_canonical,
            strict_signature,
            canonical_signature,
        },
        dependencies: reader.dependencies,
        fingerprint: result_fingerprint,
        hot: false,
    }
}

impl<'a> Reader<'a> {
    fn mark_missing(&mut self) {
        self.missing = true;
        self.missing_strict = true;
        self.missing_canonical = true;
    }

    fn fingerprint(&self) -> u64 {
        // 64-bit multiplicative rolling hash (FNV-style), order-independent
        // by folding with addition so dependency set iteration order never
        // changes the fingerprint (§4.5).
        let mut acc: u64 = 0;
        let mut ids: Vec<&String> = self.dependencies.iter().collect();
        ids.sort();
        for id in ids {
            let version = self.graph.get_record(id).map(|r| r.version).unwrap_or(0);
            let mut h: u64 = 0xcbf29ce484222325;
            for byte in id.as_bytes() {
                h ^= *byte as u64;
                h = h.wrapping_mul(PRIME);
            }
            h = h.wrapping_mul(PRIME).wrapping_add(version);
            acc = acc.wrapping_add(h);
        }
        acc
    }

    fn read_object_fields(&mut self, fields: &[PlanField], record_id: &str, record: Option<&Record>) -> (JsonMap<ByteString, JsonValue>, u64) {
        let mut out = JsonMap::new();
        let typename = record
            .and_then(|r| r.get("__typename"))
            .and_then(StoredValue::as_scalar)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let mut version = record.map(|r| r.version).unwrap_or(0);

        for field in fields {
            if let Some(type_condition) = &field.type_condition {
                if typename.as_deref() != Some(type_condition.as_str()) {
                    continue;
                }
            }

            if field.connection.is_some() {
                let (value, child_version) = self.read_connection(field, record_id);
                version = mix(version, child_version);
                out.insert(ByteString::from(field.response_key.clone()), value);
                continue;
            }

            let key = field_key(&field.field_name, Some(&field.stringify_args(self.vars)));
            let Some(record) = record else {
                self.mark_missing();
                out.insert(ByteString::from(field.response_key.clone()), JsonValue::Null);
                continue;
            };

            let (value, child_version) = match record.get(&key) {
                Some(stored) => self.read_value(field, stored),
                None => {
                    self.mark_missing();
                    (JsonValue::Null, 0)
                }
            };
            version = mix(version, child_version);
            out.insert(ByteString::from(field.response_key.clone()), value);
        }

        if self.embed_version {
            out.insert(ByteString::from("__version"), to_json_version(version));
        }
        (out, version)
    }

    fn read_value(&mut self, field: &PlanField, stored: &StoredValue) -> (JsonValue, u64) {
        match stored {
            StoredValue::Null => (JsonValue::Null, 0),
            StoredValue::Scalar(v) => (v.clone(), 0),
            StoredValue::ScalarList(items) => {
                let mut version = 0u64;
                let values = items
                    .iter()
                    .map(|item| {
                        let (value, child_version) = self.read_value(field, item);
                        version = mix(version, child_version);
                        value
                    })
                    .collect();
                (JsonValue::Array(values), version)
            }
            StoredValue::Link(id) => self.read_linked_object(field, id),
            StoredValue::LinkList(ids) => {
                let mut version = 0u64;
                let values = ids
                    .iter()
                    .map(|id| match id {
                        Some(id) => {
                            let (value, child_version) = self.read_linked_object(field, id);
                            version = mix(version, child_version);
                            value
                        }
                        None => {
                            version = mix(version, 0);
                            JsonValue::Null
                        }
                    })
                    .collect();
                (JsonValue::Array(values), version)
            }
        }
    }

    fn read_linked_object(&mut self, field: &PlanField, id: &str) -> (JsonValue, u64) {
        self.dependencies.insert(id.to_string());
        let record = self.graph.get_record(id);
        if record.is_none() {
            self.mark_missing();
        }
        let (fields, version) = self.read_object_fields(&field.children, id, record.as_ref());
        (JsonValue::Object(fields), version)
    }

    fn read_connection(&mut self, field: &PlanField, owner_id: &str) -> (JsonValue, u64) {
        let meta = field.connection.as_ref().expect("connection field");
        let full_args = field.stringify_args(self.vars);

        let strict_key = strict_connection_key(owner_id, &meta.connection_key, &full_args);
        let canonical_key = match meta.mode {
            ConnectionMode::Infinite => {
                let filter_names = meta.filter_arg_names(&field.arguments);
                let filter_args = stringify_args_filtered(&field.arguments, self.vars, |name| filter_names.contains(&name));
                Some(canonical_connection_key(owner_id, &meta.connection_key, &filter_args))
            }
            ConnectionMode::Page => None,
        };

        // Track strict/canonical layer completeness independently of
        // which record the active `mode` actually reads (§4.5 `ok`):
        // `page`-mode connections have no canonical form at all, so their
        // canonical layer is always reported unsatisfied.
        if self.graph.get_record(&strict_key).is_none() {
            self.missing_strict = true;
        }
        match &canonical_key {
            Some(key) if self.graph.get_record(key).is_some() => {}
            _ => self.missing_canonical = true,
        }

        // A `page`-mode field always reads its strict window record. An
        // `infinite`-mode field reads the canonical merged record in
        // canonical mode, but the exact strict window record in strict
        // mode — this is what lets cache-first notice a page size it has
        // never fetched even though the canonical view already covers it.
        let key = match (meta.mode, self.mode) {
            (ConnectionMode::Page, _) | (ConnectionMode::Infinite, SignatureMode::Strict) => strict_key,
            (ConnectionMode::Infinite, SignatureMode::Canonical) => {
                canonical_key.clone().expect("infinite connection always has a canonical key")
            }
        };

        self.dependencies.insert(key.clone());
        let Some(record) = self.graph.get_record(&key) else {
            self.missing = true;
            return (JsonValue::Null, 0);
        };
        let mut version = record.version;

        let edges_field = field.child("edges");
        let node_plan = edges_field.and_then(|e| e.child("node"));

        let (edges_value, edges_version) = match record.get("edges").and_then(StoredValue::as_link_list) {
            Some(ids) => {
                let mut v = 0u64;
                let values = ids
                    .iter()
                    .filter_map(|id| id.as_ref())
                    .map(|id| {
                        let (value, child_version) = self.read_edge(id, edges_field, node_plan);
                        v = mix(v, child_version);
                        value
                    })
                    .collect();
                (JsonValue::Array(values), v)
            }
            None => {
                self.missing = true;
                (JsonValue::Array(Vec::new()), 0)
            }
        };
        version = mix(version, edges_version);

        let mut out = JsonMap::new();
        for field_child in &field.children {
            match field_child.response_key.as_str() {
                "edges" => {
                    out.insert(ByteString::from("edges"), edges_value.clone());
                }
                "pageInfo" => {
                    let (page_info_value, page_info_version) = self.read_page_info(&key, field_child);
                    version = mix(version, page_info_version);
                    out.insert(ByteString::from("pageInfo"), page_info_value);
                }
                other => {
                    let (value, child_version) = record.get(other).map(|v| self.read_value(field_child, v)).unwrap_or((JsonValue::Null, 0));
                    version = mix(version, child_version);
                    out.insert(ByteString::from(other.to_string()), value);
                }
            }
        }
        if self.embed_version {
            out.insert(ByteString::from("__version"), to_json_version(version));
        }
        (JsonValue::Object(out), version)
    }

    fn read_edge(&mut self, cursor_id: &str, edges_field: Option<&PlanField>, node_plan: Option<&PlanField>) -> (JsonValue, u64) {
        self.dependencies.insert(cursor_id.to_string());
        let Some(edge_record) = self.graph.get_record(cursor_id) else {
            self.missing = true;
            return (JsonValue::Null, 0);
        };
        let mut version = edge_record.version;
        let mut out = JsonMap::new();
        if let Some(edges_field) = edges_field {
            for child in &edges_field.children {
                if child.response_key == "node" {
                    let (value, child_version) = match edge_record.get("node") {
                        Some(StoredValue::Link(node_id)) => self.read_linked_object(node_plan.unwrap_or(child), node_id),
                        Some(StoredValue::Null) | None => (JsonValue::Null, 0),
                        Some(other) => self.read_value(child, other),
                    };
                    version = mix(version, child_version);
                    out.insert(ByteString::from("node"), value);
                } else {
                    let (value, child_version) = edge_record.get(&child.response_key).map(|v| self.read_value(child, v)).unwrap_or((JsonValue::Null, 0));
                    version = mix(version, child_version);
                    out.insert(ByteString::from(child.response_key.clone()), value);
                }
            }
        }
        if self.embed_version {
            out.insert(ByteString::from("__version"), to_json_version(version));
        }
        (JsonValue::Object(out), version)
    }

    fn read_page_info(&mut self, connection_key: &str, page_info_field: &PlanField) -> (JsonValue, u64) {
        let id = page_info_id(connection_key);
        self.dependencies.insert(id.clone());
        let Some(record) = self.graph.get_record(&id) else {
            self.missing = true;
            return (JsonValue::Null, 0);
        };
        let mut version = record.version;
        let mut out = JsonMap::new();
        for child in &page_info_field.children {
            let (value, child_version) = record.get(&child.response_key).map(|v| self.read_value(child, v)).unwrap_or((JsonValue::Null, 0));
            version = mix(version, child_version);
            out.insert(ByteString::from(child.response_key.clone()), value);
        }
        if self.embed_version {
            out.insert(ByteString::from("__version"), to_json_version(version));
        }
        (JsonValue::Object(out), version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::compiler::PlanCompiler;

    #[test]
    fn materialize_reports_complete_when_every_field_present() {
        let graph = Graph::new(|_| {});
        let mut patch = indexmap::IndexMap::new();
        patch.insert("__typename".to_string(), StoredValue::Scalar(JsonValue::String("User".into())));
        patch.insert("name".to_string(), StoredValue::Scalar(JsonValue::String("Ada".into())));
        graph.put_record("User:1", patch);

        let compiler = PlanCompiler::new();
        let plan = compiler.compile("query Q { user { __typename name } }", None).unwrap();
        let mut root_patch = indexmap::IndexMap::new();
        root_patch.insert("user".to_string(), StoredValue::Link("User:1".to_string()));
        graph.put_record("@", root_patch);

        let vars = Variables::new();
        let outcome = materialize(&graph, &plan, &vars, "@", SignatureMode::Strict, false);
        assert_eq!(outcome.source, MaterializeSource::Complete);
        assert!(outcome.dependencies.contains("@"));
        assert!(outcome.dependencies.contains("User:1"));
        assert!(outcome.ok.strict);
        assert!(outcome.ok.canonical);
    }

    #[test]
    fn materialize_reports_none_when_root_absent() {
        let graph = Graph::new(|_| {});
        let compiler = PlanCompiler::new();
        let plan = compiler.compile("query Q { user { __typename name } }", None).unwrap();
        let vars = Variables::new();
        let outcome = materialize(&graph, &plan, &vars, "@", SignatureMode::Strict, false);
        assert_eq!(outcome.source, MaterializeSource::None);
        assert!(outcome.data.is_none());
        assert!(!outcome.ok.strict);
        assert!(!outcome.ok.canonical);
    }

    #[test]
    fn fingerprint_changes_when_a_dependency_version_bumps() {
        let graph = Graph::new(|_| {});
        let mut patch = indexmap::IndexMap::new();
        patch.insert("__typename".to_string(), StoredValue::Scalar(JsonValue::String("User".into())));
        patch.insert("name".to_string(), StoredValue::Scalar(JsonValue::String("Ada".into())));
        graph.put_record("User:1", patch);
        let mut root_patch = indexmap::IndexMap::new();
        root_patch.insert("user".to_string(), StoredValue::Link("User:1".to_string()));
        graph.put_record("@", root_patch);

        let compiler = PlanCompiler::new();
        let plan = compiler.compile("query Q { user { __typename name } }", None).unwrap();
        let vars = Variables::new();
        let before = materialize(&graph, &plan, &vars, "@", SignatureMode::Strict, false).fingerprint;

        let mut patch2 = indexmap::IndexMap::new();
        patch2.insert("name".to_string(), StoredValue::Scalar(JsonValue::String("Grace".into())));
        graph.put_record("User:1", patch2);
        let after = materialize(&graph, &plan, &vars, "@", SignatureMode::Strict, false).fingerprint;
        assert_ne!(before, after);
    }

    #[test]
    fn fingerprint_flag_embeds_recursive_version_on_objects() {
        let graph = Graph::new(|_| {});
        let mut patch = indexmap::IndexMap::new();
        patch.insert("__typename".to_string(), StoredValue::Scalar(JsonValue::String("User".into())));
        patch.insert("name".to_string(), StoredValue::Scalar(JsonValue::String("Ada".into())));
        graph.put_record("User:1", patch);
        let mut root_patch = indexmap::IndexMap::new();
        root_patch.insert("user".to_string(), StoredValue::Link("User:1".to_string()));
        graph.put_record("@", root_patch);

        let compiler = PlanCompiler::new();
        let plan = compiler.compile("query Q { user { __typename name } }", None).unwrap();
        let vars = Variables::new();
        let outcome = materialize(&graph, &plan, &vars, "@", SignatureMode::Strict, true);
        let data = outcome.data.expect("data present");
        let root = data.as_object().unwrap();
        assert!(root.get("__version").is_some());
        let user = root.get("user").unwrap().as_object().unwrap();
        let version = user.get("__version").unwrap().as_i64().unwrap();
        assert!(version > 0);
    }
}
