//! Identity and key construction (§3.1).
//!
//! Reserved root ids, field-key serialization and canonical/strict
//! connection key formatting all live here since every other module
//! (plan compiler, graph store, canonical merge) needs to agree on the
//! exact same strings.

use serde_json_bytes::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A caller-supplied per-type keying function (§3.1, §6.3).
pub type KeyFn = Arc<dyn Fn(&JsonValue) -> Option<String> + Send + Sync>;

/// Resolves an object's primary key, implementing the fallback precedence
/// from §3.1 plus the interface fallback this crate adds on top of it:
/// (1) a key function registered for the object's own `__typename`;
/// (2) failing that, a key function registered for an interface the
///     `interfaces` map says this concrete type satisfies;
/// (3) the `id` field;
/// (4) `None`, meaning the object embeds rather than being keyed.
#[derive(Default, Clone)]
pub struct KeyRegistry {
    keys: HashMap<String, KeyFn>,
    interfaces: HashMap<String, Vec<String>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_key(
        &mut self,
        typename: impl Into<String>,
        key_fn: impl Fn(&JsonValue) -> Option<String> + Send + Sync + 'static,
    ) {
        self.keys.insert(typename.into(), Arc::new(key_fn));
    }

    pub fn register_interface(&mut self, interface: impl Into<String>, concrete_types: Vec<String>) {
        self.interfaces.insert(interface.into(), concrete_types);
    }

    pub fn primary_key(&self, typename: &str, object: &JsonValue) -> Option<String> {
        if let Some(key_fn) = self.keys.get(typename) {
            if let Some(key) = key_fn(object) {
                return Some(key);
            }
        }
        for (interface, concretes) in &self.interfaces {
            if concretes.iter().any(|c| c == typename) {
                if let Some(key_fn) = self.keys.get(interface) {
                    if let Some(key) = key_fn(object) {
                        return Some(key);
                    }
                }
            }
        }
        if let JsonValue::Object(map) = object {
            match map.get("id") {
                Some(JsonValue::String(s)) => return Some(s.as_str().to_string()),
                Some(JsonValue::Number(n)) => return Some(n.to_string()),
                _ => {}
            }
        }
        None
    }
}

/// The singleton query root (§3.1).
pub const QUERY_ROOT: &str = "@";

/// Builds the entity id `Typename:primaryKey` (§3.1).
pub fn entity_id(typename: &str, primary_key: &str) -> String {
    format!("{typename}:{primary_key}")
}

/// Builds a field key, including sorted-JSON-serialized arguments when the
/// field takes any (§3.1): `fieldName` or `fieldName({"a":1,"b":2})`.
///
/// `args` must already be sorted by key — callers pass the output of
/// [`crate::plan::args::stringify_args`], which sorts as part of building
/// the string so this function never needs to re-sort.
pub fn field_key(field_name: &str, serialized_args: Option<&str>) -> String {
    match serialized_args {
        Some(args) if !args.is_empty() => format!("{field_name}({args})"),
        _ => field_name.to_string(),
    }
}

/// Canonical connection record id (§3.3):
/// `@connection.<ownerId>.<fieldName>({filterArgsOnly})`.
pub fn canonical_connection_key(owner_id: &str, field_name: &str, filter_args: &str) -> String {
    if filter_args.is_empty() {
        format!("@connection.{owner_id}.{field_name}")
    } else {
        format!("@connection.{owner_id}.{field_name}({filter_args})")
    }
}

/// Strict (page-shaped) connection record id: same as the canonical key but
/// with the full (filter + page) argument set, so that a distinct page of
/// the same connection gets a distinct strict record (§3.3, §4.3).
pub fn strict_connection_key(owner_id: &str, field_name: &str, full_args: &str) -> String {
    if full_args.is_empty() {
        format!("@connection.{owner_id}.{field_name}")
    } else {
        format!("@connection.{owner_id}.{field_name}({full_args})")
    }
}

/// Synthetic record id for a connection's `pageInfo` object.
pub fn page_info_id(connection_key: &str) -> String {
    format!("{connection_key}.pageInfo")
}

/// Synthetic record id for one edge of a connection, keyed by cursor so
/// that re-fetched edges with the same cursor overwrite in place (§4.3).
pub fn edge_id(connection_key: &str, cursor: &str) -> String {
    format!("{connection_key}.edge({cursor})")
}

/// Synthetic id for an embedded (unkeyable) object nested at a given
/// parent-record/field-key/index path (§3.1, §4.4). Embedded objects have
/// no stable identity of their own, so the path itself is the id.
pub fn embedded_id(parent_id: &str, field_key: &str, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{parent_id}.{field_key}.{i}"),
        None => format!("{parent_id}.{field_key}"),
    }
}

/// Monotonic allocator for mutation/subscription root ids (§4.6):
/// `@mutation.N` / `@subscription.N`.
#[derive(Debug, Default)]
pub struct RootIdAllocator {
    mutation_counter: AtomicU64,
    subscription_counter: AtomicU64,
}

impl RootIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_mutation_root(&self) -> String {
        let n = self.mutation_counter.fetch_add(1, Ordering::Relaxed);
        format!("@mutation.{n}")
    }

    pub fn next_subscription_root(&self) -> String {
        let n = self.subscription_counter.fetch_add(1, Ordering::Relaxed);
        format!("@subscription.{n}")
    }
}

/// Renders a literal argument value into the canonical JSON text used by
/// [`field_key`] and the connection key functions: object keys sorted,
/// no insignificant whitespace. `serde_json_bytes::Value`'s own `Display`
/// already serializes maps in their stored order, so callers must build
/// the map with keys pre-sorted (see `plan::args`).
pub fn render_args_json(value: &JsonValue) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_joins_typename_and_key() {
        assert_eq!(entity_id("User", "1"), "User:1");
    }

    #[test]
    fn field_key_omits_parens_when_no_args() {
        assert_eq!(field_key("name", None), "name");
        assert_eq!(field_key("name", Some("")), "name");
    }

    #[test]
    fn field_key_includes_serialized_args() {
        assert_eq!(
            field_key("posts", Some(r#"{"first":10}"#)),
            r#"posts({"first":10})"#
        );
    }

    #[test]
    fn canonical_key_matches_spec_shape() {
        assert_eq!(
            canonical_connection_key("User:1", "posts", r#"{"tag":"rust"}"#),
            r#"@connection.User:1.posts({"tag":"rust"})"#
        );
    }

    #[test]
    fn key_registry_falls_back_to_id_then_interface() {
        use serde_json_bytes::json;
        let mut registry = KeyRegistry::new();
        registry.register_key("Admin", |obj| {
            obj.as_object()?.get("adminId")?.as_str().map(str::to_string)
        });
        registry.register_interface("Actor", vec!["Bot".to_string()]);
        registry.register_key("Actor", |obj| {
            obj.as_object()?.get("actorId")?.as_str().map(str::to_string)
        });

        let admin = json!({"adminId": "a1"});
        assert_eq!(registry.primary_key("Admin", &admin), Some("a1".to_string()));

        let bot = json!({"actorId": "b1"});
        assert_eq!(registry.primary_key("Bot", &bot), Some("b1".to_string()));

        let plain = json!({"id": "u1"});
        assert_eq!(registry.primary_key("User", &plain), Some("u1".to_string()));

        let embed = json!({"label": "x"});
        assert_eq!(registry.primary_key("Unkeyable", &embed), None);
    }

    #[test]
    fn root_allocator_increments_independently() {
        let alloc = RootIdAllocator::new();
        assert_eq!(alloc.next_mutation_root(), "@mutation.0");
        assert_eq!(alloc.next_mutation_root(), "@mutation.1");
        assert_eq!(alloc.next_subscription_root(), "@subscription.0");
    }
}
