//! Document → plan compilation (§4.1).

use super::args::{is_pagination_arg, PAGINATION_ARGS};
use super::{ConnectionMeta, ConnectionMode, Plan, PlanField, PlanOperation};
use crate::ast::{Directive, Document, DocumentRoot, OperationKind, Selection, Value as AstValue, VariableDefinition};
use crate::error::PlanError;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// A field selection fully resolved of fragment spreads, tagged with the
/// type condition (if any) of the inline fragment or fragment spread it
/// came from. This is the intermediate tree both the plan field tree and
/// the network query text are derived from.
#[derive(Debug, Clone)]
struct ResolvedField {
    alias: Option<String>,
    name: String,
    type_condition: Option<String>,
    arguments: Vec<crate::ast::Argument>,
    directives: Vec<Directive>,
    selection_set: Vec<ResolvedField>,
}

impl ResolvedField {
    fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Compiles documents into immutable [`Plan`]s, memoized by document text
/// plus operation-name hint (§3.5: "memoized by the identity of the input
/// document"). Single-threaded cooperative access only — see the crate's
/// concurrency model — so plain `Cell`/`RefCell` are enough, no locking.
#[derive(Debug, Default)]
pub struct PlanCompiler {
    next_id: Cell<u64>,
    cache: RefCell<HashMap<String, Arc<Plan>>>,
}

impl PlanCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(
        &self,
        document_text: &str,
        operation_name: Option<&str>,
    ) -> Result<Arc<Plan>, PlanError> {
        let cache_key = format!("{}\0{}", operation_name.unwrap_or(""), document_text);
        if let Some(plan) = self.cache.borrow().get(&cache_key) {
            return Ok(plan.clone());
        }

        let document = Document::parse(document_text)?;
        let root = document.resolve_root(operation_name)?;

        let (operation, root_typename, selections) = match root {
            DocumentRoot::Operation(op) => {
                let (kind_name, operation) = match op.kind {
                    OperationKind::Query => ("Query", PlanOperation::Query),
                    OperationKind::Mutation => ("Mutation", PlanOperation::Mutation),
                    OperationKind::Subscription => ("Subscription", PlanOperation::Subscription),
                };
                (operation, kind_name.to_string(), &op.selection_set)
            }
            DocumentRoot::Fragment(frag) => (
                PlanOperation::Fragment,
                frag.type_condition.clone(),
                &frag.selection_set,
            ),
        };

        let variable_definitions: Vec<VariableDefinition> = match root {
            DocumentRoot::Operation(op) => op.variable_definitions.clone(),
            DocumentRoot::Fragment(_) => Vec::new(),
        };

        let resolved = resolve_selections(selections, &document, None)?;
        let mut resolved = resolved;
        inject_typename(&mut resolved);

        let mut var_mask_strict = BTreeSet::new();
        let mut window_args = BTreeSet::new();
        collect_variables(&variable_definitions, &resolved, &mut var_mask_strict, &mut window_args);
        let var_mask_canonical: BTreeSet<String> = var_mask_strict
            .difference(&window_args)
            .cloned()
            .collect();

        let (root_fields, root_index) = build_plan_fields(&resolved)?;

        let op_keyword = match operation {
            PlanOperation::Query => "query",
            PlanOperation::Mutation => "mutation",
            PlanOperation::Subscription => "subscription",
            PlanOperation::Fragment => "query",
        };
        let operation_name_text = match root {
            DocumentRoot::Operation(op) => op.name.clone(),
            DocumentRoot::Fragment(_) => None,
        };
        let network_query = render_document(op_keyword, operation_name_text.as_deref(), &variable_definitions, &resolved);

        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let plan = Arc::new(Plan {
            id,
            operation,
            root_typename,
            root: root_fields,
            root_index,
            network_query,
            var_mask_strict,
            var_mask_canonical,
            window_args,
        });

        debug!(
            plan_id = id,
            strict_vars = plan.var_mask_strict.len(),
            canonical_vars = plan.var_mask_canonical.len(),
            "compiled plan"
        );

        self.cache.borrow_mut().insert(cache_key, plan.clone());
        Ok(plan)
    }
}

fn resolve_selections(
    selections: &[Selection],
    document: &Document,
    type_condition: Option<&str>,
) -> Result<Vec<ResolvedField>, PlanError> {
    let mut out = Vec::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let children = resolve_selections(&field.selection_set, document, None)?;
                merge_into(
                    &mut out,
                    ResolvedField {
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        type_condition: type_condition.map(str::to_string),
                        arguments: field.arguments.clone(),
                        directives: field.directives.clone(),
                        selection_set: children,
                    },
                );
            }
            Selection::InlineFragment(fragment) => {
                let inner_condition = fragment.type_condition.as_deref().or(type_condition);
                let inner = resolve_selections(&fragment.selection_set, document, inner_condition)?;
                for field in inner {
                    merge_into(&mut out, field);
                }
            }
            Selection::FragmentSpread(spread) => {
                let fragment = document
                    .fragments
                    .get(&spread.name)
                    .ok_or_else(|| PlanError::UnknownFragment(spread.name.clone()))?;
                let inner = resolve_selections(
                    &fragment.selection_set,
                    document,
                    Some(fragment.type_condition.as_str()),
                )?;
                for field in inner {
                    merge_into(&mut out, field);
                }
            }
        }
    }
    Ok(out)
}

/// Merges a newly resolved field into `out`, recursively merging child
/// selections when a field with the same response key and type condition
/// already exists (§3.6 invariant 6's field-level last-write-wins applies
/// at normalize time; at plan time duplicate selections simply combine).
fn merge_into(out: &mut Vec<ResolvedField>, field: ResolvedField) {
    if let Some(existing) = out
        .iter_mut()
        .find(|f| f.response_key() == field.response_key() && f.type_condition == field.type_condition)
    {
        for child in field.selection_set {
            merge_into(&mut existing.selection_set, child);
        }
    } else {
        out.push(field);
    }
}

fn inject_typename(fields: &mut Vec<ResolvedField>) {
    inject_typename_into_set(fields);
    for field in fields.iter_mut() {
        if !field.selection_set.is_empty() {
            inject_typename(&mut field.selection_set);
        }
    }
    // A selection set with no children is a scalar leaf and never gets a
    // synthetic __typename.
}

fn inject_typename_into_set(fields: &mut Vec<ResolvedField>) {
    if fields.is_empty() {
        return;
    }
    if !fields.iter().any(|f| f.name == "__typename" && f.type_condition.is_none()) {
        fields.insert(
            0,
            ResolvedField {
                alias: None,
                name: "__typename".to_string(),
                type_condition: None,
                arguments: Vec::new(),
                directives: Vec::new(),
                selection_set: Vec::new(),
            },
        );
    }
}

fn collect_variables(
    variable_definitions: &[VariableDefinition],
    fields: &[ResolvedField],
    strict: &mut BTreeSet<String>,
    pagination: &mut BTreeSet<String>,
) {
    for def in variable_definitions {
        if let Some(default) = &def.default_value {
            collect_value_variables(default, strict);
        }
    }
    for field in fields {
        let connection = find_connection_directive(&field.directives);
        for arg in &field.arguments {
            collect_value_variables(&arg.value, strict);
            if connection.is_some() && is_pagination_arg(&arg.name) {
                if let AstValue::Variable(name) = &arg.value {
                    pagination.insert(name.clone());
                }
            }
        }
        for directive in &field.directives {
            for arg in &directive.arguments {
                collect_value_variables(&arg.value, strict);
            }
        }
        collect_variables(&[], &field.selection_set, strict, pagination);
    }
}

fn collect_value_variables(value: &AstValue, out: &mut BTreeSet<String>) {
    match value {
        AstValue::Variable(name) => {
            out.insert(name.clone());
        }
        AstValue::List(items) => items.iter().for_each(|v| collect_value_variables(v, out)),
        AstValue::Object(map) => map.values().for_each(|v| collect_value_variables(v, out)),
        _ => {}
    }
}

fn find_connection_directive(directives: &[Directive]) -> Option<&Directive> {
    directives.iter().find(|d| d.name == "connection")
}

fn build_connection_meta(
    field_name: &str,
    directive: &Directive,
    arguments: &[crate::ast::Argument],
) -> Result<ConnectionMeta, PlanError> {
    let mut key = field_name.to_string();
    let mut explicit_filters = None;
    let mut mode = ConnectionMode::Infinite;
    for arg in &directive.arguments {
        match arg.name.as_str() {
            "key" => match &arg.value {
                AstValue::String(s) => key = s.clone(),
                _ => {
                    return Err(PlanError::MalformedConnectionDirective {
                        field: field_name.to_string(),
                        reason: "`key` must be a string".to_string(),
                    })
                }
            },
            "filters" => match &arg.value {
                AstValue::List(items) => {
                    let mut filters = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            AstValue::String(s) => filters.push(s.clone()),
                            _ => {
                                return Err(PlanError::MalformedConnectionDirective {
                                    field: field_name.to_string(),
                                    reason: "`filters` entries must be strings".to_string(),
                                })
                            }
                        }
                    }
                    explicit_filters = Some(filters);
                }
                _ => {
                    return Err(PlanError::MalformedConnectionDirective {
                        field: field_name.to_string(),
                        reason: "`filters` must be a list of strings".to_string(),
                    })
                }
            },
            "mode" => match &arg.value {
                AstValue::String(s) if s == "page" => mode = ConnectionMode::Page,
                AstValue::String(s) if s == "infinite" => mode = ConnectionMode::Infinite,
                AstValue::String(s) => {
                    return Err(PlanError::MalformedConnectionDirective {
                        field: field_name.to_string(),
                        reason: format!("`mode` must be \"page\" or \"infinite\", found \"{s}\""),
                    })
                }
                _ => {
                    return Err(PlanError::MalformedConnectionDirective {
                        field: field_name.to_string(),
                        reason: "`mode` must be a string".to_string(),
                    })
                }
            },
            _ => {}
        }
    }
    let page_args = arguments
        .iter()
        .map(|a| a.name.as_str())
        .filter(|name| PAGINATION_ARGS.contains(name))
        .map(str::to_string)
        .collect();
    Ok(ConnectionMeta {
        connection_key: key,
        explicit_filters,
        page_args,
        mode,
    })
}

fn build_plan_fields(fields: &[ResolvedField]) -> Result<(Vec<PlanField>, IndexMap<String, usize>), PlanError> {
    let mut out = Vec::with_capacity(fields.len());
    let mut index = IndexMap::new();
    for field in fields {
        let (children, child_index) = build_plan_fields(&field.selection_set)?;
        let connection = find_connection_directive(&field.directives)
            .map(|d| build_connection_meta(&field.name, d, &field.arguments))
            .transpose()?;
        let response_key = field.response_key().to_string();
        index.insert(response_key.clone(), out.len());
        out.push(PlanField {
            response_key,
            field_name: field.name.clone(),
            type_condition: field.type_condition.clone(),
            arguments: field.arguments.clone(),
            children,
            child_index,
            connection,
        });
    }
    Ok((out, index))
}

fn render_document(
    op_keyword: &str,
    name: Option<&str>,
    variable_definitions: &[VariableDefinition],
    fields: &[ResolvedField],
) -> String {
    let mut out = String::new();
    out.push_str(op_keyword);
    if let Some(name) = name {
        out.push(' ');
        out.push_str(name);
    }
    if !variable_definitions.is_empty() {
        out.push('(');
        for (i, def) in variable_definitions.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&format!("${}: {}", def.name, def.type_text));
            if let Some(default) = &def.default_value {
                out.push_str(&format!(" = {default}"));
            }
        }
        out.push(')');
    }
    out.push_str(" {\n");
    render_fields(fields, 1, &mut out);
    out.push('}');
    out
}

fn render_fields(fields: &[ResolvedField], indent: usize, out: &mut String) {
    let mut groups: IndexMap<Option<String>, Vec<&ResolvedField>> = IndexMap::new();
    for field in fields {
        groups.entry(field.type_condition.clone()).or_default().push(field);
    }
    for (type_condition, group) in groups {
        match type_condition {
            None => {
                for field in group {
                    render_field(field, indent, out);
                }
            }
            Some(type_condition) => {
                out.push_str(&pad(indent));
                out.push_str(&format!("... on {type_condition} {{\n"));
                for field in group {
                    render_field(field, indent + 1, out);
                }
                out.push_str(&pad(indent));
                out.push_str("}\n");
            }
        }
    }
}

fn render_field(field: &ResolvedField, indent: usize, out: &mut String) {
    out.push_str(&pad(indent));
    if let Some(alias) = &field.alias {
        out.push_str(alias);
        out.push_str(": ");
    }
    out.push_str(&field.name);
    if !field.arguments.is_empty() {
        out.push('(');
        for (i, arg) in field.arguments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&format!("{}: {}", arg.name, arg.value));
        }
        out.push(')');
    }
    for directive in &field.directives {
        if directive.name == "connection" {
            continue;
        }
        out.push_str(&format!(" @{}", directive.name));
        if !directive.arguments.is_empty() {
            out.push('(');
            for (i, arg) in directive.arguments.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("{}: {}", arg.name, arg.value));
            }
            out.push(')');
        }
    }
    if field.selection_set.is_empty() {
        out.push('\n');
        return;
    }
    out.push_str(" {\n");
    render_fields(&field.selection_set, indent + 1, out);
    out.push_str(&pad(indent));
    out.push_str("}\n");
}

fn pad(indent: usize) -> String {
    "  ".repeat(indent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ambiguous_documents() {
        let compiler = PlanCompiler::new();
        let err = compiler
            .compile("query A { a } query B { b }", None)
            .unwrap_err();
        assert!(matches!(err, PlanError::AmbiguousDocument));
    }

    #[test]
    fn compiles_fragment_only_document() {
        let compiler = PlanCompiler::new();
        let plan = compiler.compile("fragment F on User { id name }", None).unwrap();
        assert_eq!(plan.operation, PlanOperation::Fragment);
        assert_eq!(plan.root_typename, "User");
        assert!(plan.root_field("id").is_some());
    }

    #[test]
    fn synthesizes_typename_on_object_selections() {
        let compiler = PlanCompiler::new();
        let plan = compiler
            .compile("query Q { user(id: \"1\") { name } }", None)
            .unwrap();
        let user = plan.root_field("user").unwrap();
        assert!(user.child("__typename").is_some());
        assert!(plan.network_query.contains("__typename"));
    }

    #[test]
    fn strips_connection_directive_from_network_query() {
        let compiler = PlanCompiler::new();
        let plan = compiler
            .compile(
                "query Q { users(first: 10) @connection { edges { cursor } } }",
                None,
            )
            .unwrap();
        assert!(!plan.network_query.contains("@connection"));
        let field = plan.root_field("users").unwrap();
        assert!(field.connection.is_some());
    }

    #[test]
    fn rejects_non_string_connection_key() {
        let compiler = PlanCompiler::new();
        let err = compiler
            .compile("query Q { users(first: 10) @connection(key: 5) { edges { cursor } } }", None)
            .unwrap_err();
        assert!(matches!(err, PlanError::MalformedConnectionDirective { field, .. } if field == "users"));
    }

    #[test]
    fn rejects_unknown_connection_mode() {
        let compiler = PlanCompiler::new();
        let err = compiler
            .compile("query Q { users(first: 10) @connection(mode: \"pagee\") { edges { cursor } } }", None)
            .unwrap_err();
        assert!(matches!(err, PlanError::MalformedConnectionDirective { field, .. } if field == "users"));
    }

    #[test]
    fn canonical_mask_excludes_pagination_vars_used_on_connections() {
        let compiler = PlanCompiler::new();
        let plan = compiler
            .compile(
                "query Q($n: Int) { users(first: $n) @connection { edges { cursor } } }",
                None,
            )
            .unwrap();
        assert!(plan.var_mask_strict.contains("n"));
        assert!(!plan.var_mask_canonical.contains("n"));
    }
}
