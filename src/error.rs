//! Error taxonomy (§7).
//!
//! A handful of concrete error structs, aggregated behind one
//! `#[error(transparent)]` enum so call sites can propagate with `?`
//! without naming every variant.

use std::fmt::{self, Display, Formatter};

/// A field or link that materialize expected to find but did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissKind {
    /// A `{ref: ...}` link was absent where the plan required one.
    FieldLinkMissing,
    /// A connection's canonical or strict record did not exist yet.
    ConnectionMissing,
    /// A scalar field was absent entirely (never written, not even `null`).
    ScalarMissing,
}

impl Display for MissKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MissKind::FieldLinkMissing => write!(f, "field-link-missing"),
            MissKind::ConnectionMissing => write!(f, "connection-missing"),
            MissKind::ScalarMissing => write!(f, "scalar-missing"),
        }
    }
}

/// `cache-only` found nothing usable (§4.6 decision table).
#[derive(Debug, thiserror::Error)]
#[error("no cache entry satisfies signature {signature} under cache-only policy")]
pub struct CacheMissError {
    pub signature: String,
}

/// A response arrived after its epoch was superseded (§4.6, §7).
///
/// Never surfaced to a caller's `onError`/`onData` — the coordinator drops
/// it on the spot — but it is constructed so the drop can be logged and
/// tested (§8 scenario C) without reaching for a bare `bool`.
#[derive(Debug, thiserror::Error)]
#[error("stale response for signature {signature}: epoch {observed} superseded by {current}")]
pub struct StaleResponseError {
    pub signature: String,
    pub observed: u64,
    pub current: u64,
}

/// A transport-level failure, mirroring `{networkError}` in §6.1.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct NetworkError {
    pub message: String,
}

/// One entry of a GraphQL `errors` array in a response.
#[derive(Debug, Clone, thiserror::Error, serde::Deserialize, serde::Serialize)]
#[error("{message}")]
pub struct GraphQLError {
    pub message: String,
    #[serde(default)]
    pub path: Vec<String>,
}

/// Any mix of a network error and a non-empty `graphqlErrors` list (§7).
#[derive(Debug, thiserror::Error)]
pub struct CombinedError {
    pub network_error: Option<NetworkError>,
    pub graphql_errors: Vec<GraphQLError>,
}

impl CombinedError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            network_error: Some(NetworkError { message: message.into() }),
            graphql_errors: Vec::new(),
        }
    }

    pub fn graphql(errors: Vec<GraphQLError>) -> Self {
        Self { network_error: None, graphql_errors: errors }
    }
}

impl Display for CombinedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(network) = &self.network_error {
            write!(f, "[Network] {}", network.message)
        } else {
            for (i, err) in self.graphql_errors.iter().enumerate() {
                if i > 0 {
                    writeln!(f)?;
                }
                write!(f, "[GraphQL] {}", err.message)?;
            }
            Ok(())
        }
    }
}

/// Normalize-time failures (§4.4).
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing __typename for keyed object at path {path}")]
    MissingTypename { path: String },
    #[error("response shape disagrees with plan at path {path}: expected {expected}, found {found}")]
    ShapeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("type {typename} has no key function and no `id` field to key {path}")]
    UnkeyableObject { typename: String, path: String },
}

/// Compile-time failures (§4.1).
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("document must contain exactly one operation or exactly one named fragment")]
    AmbiguousDocument,
    #[error("fragment `{0}` not found in document")]
    UnknownFragment(String),
    #[error("malformed @connection directive on field `{field}`: {reason}")]
    MalformedConnectionDirective { field: String, reason: String },
    #[error("failed to parse document: {0}")]
    SyntaxError(String),
}

/// Materialize reported `source == none` after a write that should have
/// satisfied the plan (§4.5/§7); the coordinator elevates this into a
/// `CombinedError` wrapping this explanatory message.
#[derive(Debug, thiserror::Error)]
#[error("materialize could not satisfy plan {plan_id} after a successful write: {reason}")]
pub struct MaterializeFailure {
    pub plan_id: u64,
    pub reason: String,
}

/// The aggregate error type propagated out of public cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    CacheMiss(#[from] CacheMissError),
    #[error(transparent)]
    Combined(#[from] CombinedError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Materialize(#[from] MaterializeFailure),
}

pub type CacheResult<T> = Result<T, CacheError>;
