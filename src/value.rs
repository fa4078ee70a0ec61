//! Response and stored value representations (§3.2).
//!
//! Network responses and literal argument values are kept in
//! `serde_json_bytes::Value` rather than `serde_json::Value`: its `Value`
//! clones are reference-counted, which is what lets materialize hand back a
//! `hot` result (§4.5) without copying whole subtrees on every read.

use serde_json_bytes::Value as JsonValue;
use std::fmt;

/// What a single field-key entry in a [`crate::graph::Record`] holds.
///
/// A record never stores nested objects directly — normalize replaces every
/// keyable or embeddable object with a link before it reaches the graph
/// (§4.4) — so this enum only needs to cover scalars, links, and the two
/// list shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Scalar(JsonValue),
    Null,
    Link(String),
    LinkList(Vec<Option<String>>),
    ScalarList(Vec<StoredValue>),
}

impl StoredValue {
    pub fn as_link(&self) -> Option<&str> {
        match self {
            StoredValue::Link(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_link_list(&self) -> Option<&[Option<String>]> {
        match self {
            StoredValue::LinkList(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&JsonValue> {
        match self {
            StoredValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StoredValue::Null)
    }
}

impl fmt::Display for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredValue::Scalar(v) => write!(f, "{v}"),
            StoredValue::Null => write!(f, "null"),
            StoredValue::Link(id) => write!(f, "-> {id}"),
            StoredValue::LinkList(ids) => write!(f, "-> [{}]", ids.len()),
            StoredValue::ScalarList(items) => write!(f, "[{} items]", items.len()),
        }
    }
}
