//! Compiled query plans (§3.4).

pub mod args;
pub mod compiler;
pub mod signature;

use crate::ast::Argument;
use indexmap::IndexMap;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOperation {
    Query,
    Mutation,
    Subscription,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Infinite,
    Page,
}

/// `{connectionKey, connectionFilters, pageArgs, mode}` from §3.4.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    /// The `key` directive argument, defaulting to the field name — the
    /// `<fieldName>` component of `@connection.<ownerId>.<fieldName>(...)`.
    pub connection_key: String,
    /// Explicit `filters` list from the directive, if any. `None` means
    /// "every non-pagination argument" per §4.1.
    pub explicit_filters: Option<Vec<String>>,
    /// Pagination argument names (`first`/`last`/`after`/`before`) actually
    /// present on this field.
    pub page_args: Vec<String>,
    pub mode: ConnectionMode,
}

impl ConnectionMeta {
    /// Names of the arguments that form the canonical filter set (§3.1).
    pub fn filter_arg_names<'a>(&'a self, all_args: &'a [Argument]) -> Vec<&'a str> {
        match &self.explicit_filters {
            Some(names) => names.iter().map(|s| s.as_str()).collect(),
            None => all_args
                .iter()
                .map(|a| a.name.as_str())
                .filter(|name| !args::is_pagination_arg(name))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanField {
    pub response_key: String,
    pub field_name: String,
    /// Set when this field only applies under a particular concrete type
    /// (it came from an inline fragment or fragment spread with a type
    /// condition); materialize consults `__typename` before including it.
    pub type_condition: Option<String>,
    pub arguments: Vec<Argument>,
    pub children: Vec<PlanField>,
    pub child_index: IndexMap<String, usize>,
    pub connection: Option<ConnectionMeta>,
}

impl PlanField {
    pub fn build_args(&self, vars: &args::Variables) -> IndexMap<String, serde_json_bytes::Value> {
        args::build_args(&self.arguments, vars)
    }

    pub fn stringify_args(&self, vars: &args::Variables) -> String {
        args::stringify_args(&self.arguments, vars)
    }

    /// The field key this field occupies on its parent record (§3.1).
    pub fn field_key(&self, vars: &args::Variables) -> String {
        let serialized = self.stringify_args(vars);
        crate::keys::field_key(&self.field_name, Some(&serialized))
    }

    pub fn child(&self, response_key: &str) -> Option<&PlanField> {
        self.child_index.get(response_key).map(|&i| &self.children[i])
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureMode {
    Strict,
    Canonical,
}

/// A compiled, immutable plan (§3.4).
#[derive(Debug)]
pub struct Plan {
    pub id: u64,
    pub operation: PlanOperation,
    pub root_typename: String,
    pub root: Vec<PlanField>,
    pub root_index: IndexMap<String, usize>,
    pub network_query: String,
    pub var_mask_strict: BTreeSet<String>,
    pub var_mask_canonical: BTreeSet<String>,
    pub window_args: BTreeSet<String>,
}

impl Plan {
    pub fn root_field(&self, response_key: &str) -> Option<&PlanField> {
        self.root_index.get(response_key).map(|&i| &self.root[i])
    }

    pub fn make_signature(&self, mode: SignatureMode, vars: &args::Variables) -> String {
        signature::make_signature(self, mode, vars)
    }
}
