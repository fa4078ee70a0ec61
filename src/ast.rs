//! Owned document AST (§4.1).
//!
//! The plan compiler needs a document tree it can hold onto, walk
//! repeatedly, and match against without re-parsing or borrowing from
//! `apollo_parser`'s CST. This module converts the CST produced by
//! `apollo_parser::Parser` into owned, `Clone`-able structs once, at
//! compile time rather than borrowing `apollo_parser::ast` nodes and
//! working with raw syntax nodes throughout the rest of the crate.
//!
//! Because this cache never validates against a schema (§1 non-goals),
//! the conversion only needs to recognize GraphQL executable-document
//! grammar, not resolve types.

use crate::error::PlanError;
use apollo_parser::{ast, Parser};
use indexmap::IndexMap;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<Value>),
    Object(IndexMap<String, Value>),
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

impl Field {
    /// The key this field occupies in its parent's selection map: the
    /// alias if present, otherwise the field name (§3.1).
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone)]
pub struct FragmentSpread {
    pub name: String,
    pub directives: Vec<Directive>,
}

#[derive(Debug, Clone)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
    FragmentSpread(FragmentSpread),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    /// Any scalar/enum/object type, nullable or not — the compiler never
    /// needs the full type grammar since it does not validate (§1).
    Any,
}

#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: VariableType,
    /// Source text of the type expression (e.g. `"[ID!]!"`), kept verbatim
    /// so the network query printer can reproduce it without re-deriving
    /// type grammar this crate otherwise has no reason to parse (§1).
    pub type_text: String,
    pub default_value: Option<Value>,
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Variable(name) => write!(f, "${name}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::Enum(e) => write!(f, "{e}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationDefinition {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

/// A fully parsed document: zero or more operations, plus named fragments
/// keyed by name for spread resolution.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub operations: Vec<OperationDefinition>,
    pub fragments: HashMap<String, FragmentDefinition>,
}

impl Document {
    pub fn parse(source: &str) -> Result<Document, PlanError> {
        let parser = Parser::new(source);
        let tree = parser.parse();
        let errors: Vec<_> = tree.errors().collect();
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(|e| e.message().to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PlanError::SyntaxError(message));
        }
        let cst_document = tree.document();
        let mut document = Document::default();
        for definition in cst_document.definitions() {
            match definition {
                ast::Definition::OperationDefinition(op) => {
                    document.operations.push(convert_operation(&op)?);
                }
                ast::Definition::FragmentDefinition(frag) => {
                    let fragment = convert_fragment(&frag)?;
                    document.fragments.insert(fragment.name.clone(), fragment);
                }
                _ => {}
            }
        }
        Ok(document)
    }

    /// Resolves the single executable root this document should compile
    /// into a plan for: the lone operation, the lone operation matching
    /// `operation_name`, or (§4.1 fragment-only documents) the lone named
    /// fragment when there are no operations at all.
    pub fn resolve_root(
        &self,
        operation_name: Option<&str>,
    ) -> Result<DocumentRoot<'_>, PlanError> {
        if self.operations.is_empty() {
            return match (self.fragments.len(), operation_name) {
                (1, _) => Ok(DocumentRoot::Fragment(self.fragments.values().next().unwrap())),
                (_, Some(name)) => self
                    .fragments
                    .get(name)
                    .map(DocumentRoot::Fragment)
                    .ok_or_else(|| PlanError::UnknownFragment(name.to_string())),
                _ => Err(PlanError::AmbiguousDocument),
            };
        }
        match operation_name {
            Some(name) => self
                .operations
                .iter()
                .find(|op| op.name.as_deref() == Some(name))
                .map(DocumentRoot::Operation)
                .ok_or(PlanError::AmbiguousDocument),
            None if self.operations.len() == 1 => {
                Ok(DocumentRoot::Operation(&self.operations[0]))
            }
            None => Err(PlanError::AmbiguousDocument),
        }
    }
}

#[derive(Clone, Copy)]
pub enum DocumentRoot<'a> {
    Operation(&'a OperationDefinition),
    Fragment(&'a FragmentDefinition),
}

fn convert_operation(op: &ast::OperationDefinition) -> Result<OperationDefinition, PlanError> {
    let kind = match op.operation_type() {
        Some(t) if t.mutation_token().is_some() => OperationKind::Mutation,
        Some(t) if t.subscription_token().is_some() => OperationKind::Subscription,
        _ => OperationKind::Query,
    };
    let name = op.name().map(|n| n.text().to_string());
    let variable_definitions = op
        .variable_definitions()
        .into_iter()
        .flat_map(|defs| defs.variable_definitions())
        .map(convert_variable_definition)
        .collect::<Result<Vec<_>, _>>()?;
    let directives = op
        .directives()
        .into_iter()
        .flat_map(|ds| ds.directives())
        .map(convert_directive)
        .collect::<Result<Vec<_>, _>>()?;
    let selection_set = op
        .selection_set()
        .map(|s| convert_selection_set(&s))
        .transpose()?
        .unwrap_or_default();
    Ok(OperationDefinition {
        kind,
        name,
        variable_definitions,
        directives,
        selection_set,
    })
}

fn convert_fragment(frag: &ast::FragmentDefinition) -> Result<FragmentDefinition, PlanError> {
    let name = frag
        .fragment_name()
        .and_then(|n| n.name())
        .map(|n| n.text().to_string())
        .ok_or(PlanError::AmbiguousDocument)?;
    let type_condition = frag
        .type_condition()
        .and_then(|t| t.named_type())
        .and_then(|t| t.name())
        .map(|n| n.text().to_string())
        .ok_or(PlanError::AmbiguousDocument)?;
    let directives = frag
        .directives()
        .into_iter()
        .flat_map(|ds| ds.directives())
        .map(convert_directive)
        .collect::<Result<Vec<_>, _>>()?;
    let selection_set = convert_selection_set(
        &frag
            .selection_set()
            .ok_or(PlanError::AmbiguousDocument)?,
    )?;
    Ok(FragmentDefinition {
        name,
        type_condition,
        directives,
        selection_set,
    })
}

fn convert_variable_definition(
    def: ast::VariableDefinition,
) -> Result<VariableDefinition, PlanError> {
    let name = def
        .variable()
        .and_then(|v| v.name())
        .map(|n| n.text().to_string())
        .ok_or(PlanError::AmbiguousDocument)?;
    let type_text = def
        .ty()
        .map(|t| t.source_string())
        .ok_or(PlanError::AmbiguousDocument)?;
    let default_value = def
        .default_value()
        .and_then(|d| d.value())
        .map(|v| convert_value(&v))
        .transpose()?;
    Ok(VariableDefinition {
        name,
        ty: VariableType::Any,
        type_text,
        default_value,
    })
}

fn convert_directive(directive: ast::Directive) -> Result<Directive, PlanError> {
    let name = directive
        .name()
        .map(|n| n.text().to_string())
        .ok_or(PlanError::AmbiguousDocument)?;
    let arguments = directive
        .arguments()
        .into_iter()
        .flat_map(|a| a.arguments())
        .map(convert_argument)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Directive { name, arguments })
}

fn convert_argument(arg: ast::Argument) -> Result<Argument, PlanError> {
    let name = arg
        .name()
        .map(|n| n.text().to_string())
        .ok_or(PlanError::AmbiguousDocument)?;
    let value = arg
        .value()
        .map(|v| convert_value(&v))
        .transpose()?
        .ok_or(PlanError::AmbiguousDocument)?;
    Ok(Argument { name, value })
}

fn convert_value(value: &ast::Value) -> Result<Value, PlanError> {
    let converted = match value {
        ast::Value::Variable(v) => Value::Variable(
            v.name()
                .map(|n| n.text().to_string())
                .ok_or(PlanError::AmbiguousDocument)?,
        ),
        ast::Value::IntValue(v) => Value::Int(
            v.source_string()
                .parse()
                .map_err(|_| PlanError::AmbiguousDocument)?,
        ),
        ast::Value::FloatValue(v) => Value::Float(
            v.source_string()
                .parse()
                .map_err(|_| PlanError::AmbiguousDocument)?,
        ),
        ast::Value::StringValue(v) => Value::String(unquote(&v.source_string())),
        ast::Value::BooleanValue(v) => Value::Boolean(v.true_token().is_some()),
        ast::Value::NullValue(_) => Value::Null,
        ast::Value::EnumValue(v) => Value::Enum(
            v.name()
                .map(|n| n.text().to_string())
                .ok_or(PlanError::AmbiguousDocument)?,
        ),
        ast::Value::ListValue(v) => {
            let items = v
                .values()
                .map(|item| convert_value(&item))
                .collect::<Result<Vec<_>, _>>()?;
            Value::List(items)
        }
        ast::Value::ObjectValue(v) => {
            let mut map = IndexMap::new();
            for field in v.object_fields() {
                let key = field
                    .name()
                    .map(|n| n.text().to_string())
                    .ok_or(PlanError::AmbiguousDocument)?;
                let field_value = field
                    .value()
                    .map(|val| convert_value(&val))
                    .transpose()?
                    .ok_or(PlanError::AmbiguousDocument)?;
                map.insert(key, field_value);
            }
            Value::Object(map)
        }
    };
    Ok(converted)
}

fn unquote(source: &str) -> String {
    source.trim_matches('"').to_string()
}

fn convert_selection_set(set: &ast::SelectionSet) -> Result<Vec<Selection>, PlanError> {
    set.selections().map(convert_selection).collect()
}

fn convert_selection(selection: ast::Selection) -> Result<Selection, PlanError> {
    match selection {
        ast::Selection::Field(field) => {
            let name = field
                .name()
                .map(|n| n.text().to_string())
                .ok_or(PlanError::AmbiguousDocument)?;
            let alias = field
                .alias()
                .and_then(|a| a.name())
                .map(|n| n.text().to_string());
            let arguments = field
                .arguments()
                .into_iter()
                .flat_map(|a| a.arguments())
                .map(convert_argument)
                .collect::<Result<Vec<_>, _>>()?;
            let directives = field
                .directives()
                .into_iter()
                .flat_map(|ds| ds.directives())
                .map(convert_directive)
                .collect::<Result<Vec<_>, _>>()?;
            let selection_set = field
                .selection_set()
                .map(|s| convert_selection_set(&s))
                .transpose()?
                .unwrap_or_default();
            Ok(Selection::Field(Field {
                alias,
                name,
                arguments,
                directives,
                selection_set,
            }))
        }
        ast::Selection::InlineFragment(fragment) => {
            let type_condition = fragment
                .type_condition()
                .and_then(|t| t.named_type())
                .and_then(|t| t.name())
                .map(|n| n.text().to_string());
            let directives = fragment
                .directives()
                .into_iter()
                .flat_map(|ds| ds.directives())
                .map(convert_directive)
                .collect::<Result<Vec<_>, _>>()?;
            let selection_set = fragment
                .selection_set()
                .map(|s| convert_selection_set(&s))
                .transpose()?
                .unwrap_or_default();
            Ok(Selection::InlineFragment(InlineFragment {
                type_condition,
                directives,
                selection_set,
            }))
        }
        ast::Selection::FragmentSpread(spread) => {
            let name = spread
                .fragment_name()
                .and_then(|n| n.name())
                .map(|n| n.text().to_string())
                .ok_or(PlanError::AmbiguousDocument)?;
            let directives = spread
                .directives()
                .into_iter()
                .flat_map(|ds| ds.directives())
                .map(convert_directive)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Selection::FragmentSpread(FragmentSpread { name, directives }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_query() {
        let doc = Document::parse("query Test { user(id: \"1\") { name } }").unwrap();
        assert_eq!(doc.operations.len(), 1);
        assert_eq!(doc.operations[0].name.as_deref(), Some("Test"));
    }

    #[test]
    fn fragment_only_document_has_no_operations() {
        let doc = Document::parse("fragment F on User { name }").unwrap();
        assert!(doc.operations.is_empty());
        assert!(doc.fragments.contains_key("F"));
    }
}
