//! Transport contract (§6.1): the only way this crate talks to the
//! network. Callers supply an implementation; the cache never embeds an
//! HTTP client itself.

use crate::error::NetworkError;
use crate::plan::Plan;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json_bytes::Value as JsonValue;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

/// `{query, variables, operationType, plan}` (§6.1).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub query: String,
    pub variables: crate::plan::args::Variables,
    pub operation_type: OperationType,
    pub plan: Arc<Plan>,
}

/// `{networkError} | {graphqlErrors: [...]}` (§6.1).
#[derive(Debug, Clone)]
pub enum TransportError {
    Network(NetworkError),
    GraphQL(Vec<crate::error::GraphQLError>),
}

/// `{data?, error?}` (§6.1).
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub data: Option<JsonValue>,
    pub error: Option<TransportError>,
}

/// The caller-supplied network boundary. `http` drives `executeQuery` and
/// `executeMutation`; `ws` drives `executeSubscription` and is optional —
/// a transport with no subscription support simply never implements it
/// (the default returns an error), rather than this crate depending on a
/// WebSocket client directly.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn http(&self, context: RequestContext) -> TransportResponse;

    async fn ws(&self, context: RequestContext) -> Result<BoxStream<'static, TransportResponse>, NetworkError> {
        let _ = context;
        Err(NetworkError { message: "this transport does not support subscriptions".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::compiler::PlanCompiler;
    use futures::stream;

    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn http(&self, _context: RequestContext) -> TransportResponse {
            TransportResponse { data: Some(JsonValue::Null), error: None }
        }

        async fn ws(&self, _context: RequestContext) -> Result<BoxStream<'static, TransportResponse>, NetworkError> {
            Ok(Box::pin(stream::once(async { TransportResponse { data: Some(JsonValue::Null), error: None } })))
        }
    }

    #[test]
    fn http_round_trips_through_the_trait_object() {
        let compiler = PlanCompiler::new();
        let plan = compiler.compile("query Q { x }", None).unwrap();
        let transport: Arc<dyn Transport> = Arc::new(EchoTransport);
        let response = futures::executor::block_on(transport.http(RequestContext {
            query: plan.network_query.clone(),
            variables: Default::default(),
            operation_type: OperationType::Query,
            plan: plan.clone(),
        }));
        assert!(response.error.is_none());
    }
}
