//! The public cache facade (§6.2): wires the plan compiler, graph store,
//! normalize/materialize engine, and operations coordinator together
//! behind one surface.

use crate::config::CacheConfig;
use crate::document::materialize::{MaterializeOutcome, MaterializeSource};
use crate::document::result_cache::{CacheKey, ResultCache};
use crate::document::{materialize, normalize};
use crate::error::{CacheError, CacheMissError, CombinedError, GraphQLError};
use crate::graph::{Graph, OptimisticHandle};
use crate::keys::{entity_id, QUERY_ROOT};
use crate::ops::{root_for_operation, CachePolicy, Decision, EpochGuard, SuspensionWindow, WatcherId, WatcherRegistry};
use crate::ops::policy;
use crate::plan::args::Variables;
use crate::plan::compiler::PlanCompiler;
use crate::plan::{Plan, PlanOperation, SignatureMode};
use crate::snapshot;
use crate::transport::{OperationType, RequestContext, Transport, TransportError};
use serde_json_bytes::Value as JsonValue;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

pub struct Cache {
    graph: Arc<Graph>,
    compiler: PlanCompiler,
    result_cache: Rc<RefCell<ResultCache>>,
    watchers: Rc<WatcherRegistry>,
    epochs: EpochGuard,
    suspension: SuspensionWindow,
    roots: crate::keys::RootIdAllocator,
    config: CacheConfig,
    hydrating_until: Cell<Option<Instant>>,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        let result_cache = Rc::new(RefCell::new(ResultCache::new()));
        let watchers = Rc::new(WatcherRegistry::new());
        let rc_for_graph = result_cache.clone();
        let watchers_for_graph = watchers.clone();
        let graph = Graph::new(move |touched| {
            rc_for_graph.borrow_mut().invalidate(touched);
            watchers_for_graph.notify(touched);
        });
        Self {
            graph,
            compiler: PlanCompiler::new(),
            result_cache,
            watchers,
            epochs: EpochGuard::new(),
            suspension: SuspensionWindow::new(),
            roots: crate::keys::RootIdAllocator::new(),
            config,
            hydrating_until: Cell::new(None),
        }
    }

    /// `identify(object) -> entityId | null` (§6.2).
    pub fn identify(&self, typename: &str, object: &JsonValue) -> Option<String> {
        self.config.keys.primary_key(typename, object).map(|key| entity_id(typename, &key))
    }

    /// `Cache::begin_hydration` (§4.6 SUPPLEMENT): opens the hydration
    /// window for `hydrationTimeout` ms from now.
    pub fn begin_hydration(&self) {
        self.hydrating_until.set(Some(Instant::now() + self.config.hydration_timeout()));
    }

    pub fn end_hydration(&self) {
        self.hydrating_until.set(None);
    }

    fn is_hydrating(&self) -> bool {
        self.hydrating_until.get().is_some_and(|deadline| Instant::now() < deadline)
    }

    fn compile(&self, document: &str, operation_name: Option<&str>) -> Result<Arc<Plan>, CacheError> {
        Ok(self.compiler.compile(document, operation_name)?)
    }

    /// Materializes through the result cache (§4.5 `hot`): recomputes the
    /// plan's fingerprint, returns the cached entry with `hot: true` when
    /// it still matches, and otherwise stores the freshly assembled result
    /// for next time — the same write-through pattern [`Cache::execute`]
    /// uses for network-backed reads.
    fn materialize_cached(&self, plan: &Arc<Plan>, vars: &Variables, root_id: &str, mode: SignatureMode) -> MaterializeOutcome {
        let masked_vars = plan.make_signature(mode, vars);
        let key = CacheKey {
            plan_id: plan.id,
            masked_vars,
            mode,
            fingerprint_only: false,
            root_id: root_id.to_string(),
        };

        let outcome = materialize(&self.graph, plan, vars, root_id, mode, true);
        let hot = self.result_cache.borrow().get_hot(&key, outcome.fingerprint).is_some();
        if let Some(data) = &outcome.data {
            self.result_cache.borrow_mut().insert(key, data.clone(), outcome.fingerprint, outcome.dependencies.clone());
        }
        MaterializeOutcome { hot, ..outcome }
    }

    // -- Query-scoped API --------------------------------------------

    /// Reads in canonical mode: connection fields see the pagination-
    /// independent merged view rather than one exact window (§4.5).
    pub fn read_query(&self, document: &str, operation_name: Option<&str>, vars: &Variables) -> Result<MaterializeOutcome, CacheError> {
        let plan = self.compile(document, operation_name)?;
        Ok(self.materialize_cached(&plan, vars, QUERY_ROOT, SignatureMode::Canonical))
    }

    pub fn write_query(&self, document: &str, operation_name: Option<&str>, vars: &Variables, data: &JsonValue) -> Result<(), CacheError> {
        let plan = self.compile(document, operation_name)?;
        normalize(&self.graph, &plan, vars, data, QUERY_ROOT, &self.config.keys)?;
        Ok(())
    }

    pub fn watch_query(
        &self,
        document: &str,
        operation_name: Option<&str>,
        vars: Variables,
        on_data: impl Fn(&JsonValue) + 'static,
    ) -> Result<WatcherId, CacheError> {
        let plan = self.compile(document, operation_name)?;
        self.watch_root(plan, vars, QUERY_ROOT.to_string(), on_data)
    }

    // -- Entity-scoped API --------------------------------------------

    pub fn read_fragment(&self, fragment: &str, fragment_name: Option<&str>, entity_id: &str, vars: &Variables) -> Result<MaterializeOutcome, CacheError> {
        let plan = self.compile(fragment, fragment_name)?;
        Ok(self.materialize_cached(&plan, vars, entity_id, SignatureMode::Canonical))
    }

    pub fn write_fragment(&self, fragment: &str, fragment_name: Option<&str>, entity_id: &str, vars: &Variables, data: &JsonValue) -> Result<(), CacheError> {
        let plan = self.compile(fragment, fragment_name)?;
        normalize(&self.graph, &plan, vars, data, entity_id, &self.config.keys)?;
        Ok(())
    }

    pub fn watch_fragment(
        &self,
        fragment: &str,
        fragment_name: Option<&str>,
        entity_id: &str,
        vars: Variables,
        on_data: impl Fn(&JsonValue) + 'static,
    ) -> Result<WatcherId, CacheError> {
        let plan = self.compile(fragment, fragment_name)?;
        self.watch_root(plan, vars, entity_id.to_string(), on_data)
    }

    fn watch_root(&self, plan: Arc<Plan>, vars: Variables, root_id: String, on_data: impl Fn(&JsonValue) + 'static) -> Result<WatcherId, CacheError> {
        let initial = materialize(&self.graph, &plan, &vars, &root_id, SignatureMode::Canonical, false);
        let last_fingerprint = Cell::new(initial.fingerprint);
        if let Some(data) = &initial.data {
            on_data(data);
        }
        let graph = self.graph.clone();
        let watchers = self.watchers.clone();
        let dependencies = initial.dependencies.clone();
        let watcher_id = Rc::new(Cell::new(0u64));
        let watcher_id_for_closure = watcher_id.clone();
        let id = self.watchers.register(dependencies, move |_touched| {
            let outcome = materialize(&graph, &plan, &vars, &root_id, SignatureMode::Canonical, false);
            watchers.update_dependencies(watcher_id_for_closure.get(), outcome.dependencies.clone());
            if outcome.fingerprint != last_fingerprint.get() {
                last_fingerprint.set(outcome.fingerprint);
                if let Some(data) = &outcome.data {
                    on_data(data);
                }
            }
        });
        watcher_id.set(id);
        Ok(id)
    }

    pub fn unwatch(&self, id: WatcherId) {
        self.watchers.unregister(id);
    }

    pub fn modify_optimistic(&self, name: impl Into<String>, f: impl FnOnce(&Graph)) -> OptimisticHandle {
        Graph::begin_optimistic(&self.graph, name, f)
    }

    // -- Network-integrated API ---------------------------------------

    pub async fn execute_query(&self, document: &str, operation_name: Option<&str>, vars: Variables, policy: CachePolicy) -> Result<MaterializeOutcome, CacheError> {
        self.execute_query_with_cache_data(document, operation_name, vars, policy, |_| {}).await
    }

    /// Like [`Cache::execute_query`], but invokes `on_cache_data` with the
    /// cached value before the network round-trip when the policy's
    /// decision says to emit it (§4.6: `cache-and-network`'s defining
    /// behavior — emit the cache, then resolve with the network result).
    pub async fn execute_query_with_cache_data(
        &self,
        document: &str,
        operation_name: Option<&str>,
        vars: Variables,
        policy: CachePolicy,
        on_cache_data: impl Fn(&JsonValue),
    ) -> Result<MaterializeOutcome, CacheError> {
        let plan = self.compile(document, operation_name)?;
        self.execute(plan, vars, QUERY_ROOT.to_string(), OperationType::Query, policy, on_cache_data).await
    }

    pub async fn execute_mutation(&self, document: &str, operation_name: Option<&str>, vars: Variables) -> Result<MaterializeOutcome, CacheError> {
        let plan = self.compile(document, operation_name)?;
        let root_id = root_for_operation(&self.roots, PlanOperation::Mutation);
        self.execute(plan, vars, root_id, OperationType::Mutation, CachePolicy::NetworkOnly, |_| {}).await
    }

    async fn execute(
        &self,
        plan: Arc<Plan>,
        vars: Variables,
        root_id: String,
        operation_type: OperationType,
        policy: CachePolicy,
        on_cache_data: impl Fn(&JsonValue),
    ) -> Result<MaterializeOutcome, CacheError> {
        let strict_signature = plan.make_signature(SignatureMode::Strict, &vars);

        let cached = materialize(&self.graph, &plan, &vars, &root_id, SignatureMode::Strict, false);
        let effective_policy = if self.is_hydrating() && matches!(operation_type, OperationType::Query) {
            CachePolicy::CacheFirst
        } else if self.suspension.is_suspended(&strict_signature, self.config.suspension_timeout()) {
            CachePolicy::CacheFirst
        } else {
            policy
        };

        let Decision { emit_cached, fetch_network, miss } = policy::decide(effective_policy, cached.source);
        if miss {
            return Err(CacheMissError { signature: strict_signature }.into());
        }
        if emit_cached {
            if let Some(data) = &cached.data {
                on_cache_data(data);
            }
        }
        if !fetch_network {
            return Ok(cached);
        }

        let epoch = self.epochs.advance(&strict_signature);
        let context = RequestContext {
            query: plan.network_query.clone(),
            variables: vars.clone(),
            operation_type,
            plan: plan.clone(),
        };
        let response = self.config.transport.http(context).await;

        if self.epochs.accept(&strict_signature, epoch).is_err() {
            return Ok(cached);
        }

        if let Some(error) = response.error {
            let combined = match error {
                TransportError::Network(network) => CombinedError::network(network.message),
                TransportError::GraphQL(errors) => CombinedError::graphql(errors),
            };
            self.suspension.record(&strict_signature);
            return Err(combined.into());
        }
        let Some(data) = response.data else {
            let combined = CombinedError::graphql(vec![GraphQLError { message: "transport returned no data and no error".to_string(), path: Vec::new() }]);
            return Err(combined.into());
        };

        normalize(&self.graph, &plan, &vars, &data, &root_id, &self.config.keys)?;
        self.suspension.record(&strict_signature);

        let outcome = materialize(&self.graph, &plan, &vars, &root_id, SignatureMode::Strict, false);
        let key = CacheKey {
            plan_id: plan.id,
            masked_vars: strict_signature.clone(),
            mode: SignatureMode::Strict,
            fingerprint_only: false,
            root_id: root_id.clone(),
        };
        if let Some(data) = &outcome.data {
            self.result_cache.borrow_mut().insert(key, data.clone(), outcome.fingerprint, outcome.dependencies.clone());
        }
        Ok(outcome)
    }

    // -- Snapshotting ----------------------------------------------------

    pub fn dehydrate(&self) -> JsonValue {
        snapshot::dehydrate(&self.graph.snapshot_records())
    }

    pub fn hydrate(&self, snapshot: &JsonValue) -> Result<(), String> {
        let records = snapshot::hydrate(snapshot)?;
        self.graph.replace_base(records);
        Ok(())
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("watchers", &self.watchers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use std::cell::RefCell as StdRefCell;
    use std::sync::Mutex;

    struct StubTransport {
        response: Mutex<Option<TransportResponse>>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn http(&self, _context: RequestContext) -> TransportResponse {
            self.response.lock().unwrap().take().expect("stub only answers once")
        }
    }

    fn config_with(response: TransportResponse) -> CacheConfig {
        CacheConfig::new(Arc::new(StubTransport { response: Mutex::new(Some(response)) }))
    }

    #[test]
    fn write_then_read_query_round_trips() {
        let cache = Cache::new(config_with(TransportResponse { data: None, error: None }));
        let data: JsonValue = serde_json_bytes::json!({"__typename": "Query", "user": {"__typename": "User", "id": "1", "name": "Ada"}});
        let vars = Variables::new();
        cache.write_query("query Q { user { id name } }", None, &vars, &data).unwrap();
        let outcome = cache.read_query("query Q { user { id name } }", None, &vars).unwrap();
        assert_eq!(outcome.source, MaterializeSource::Complete);
    }

    #[test]
    fn execute_query_network_only_normalizes_the_response() {
        let data = serde_json_bytes::json!({"__typename": "Query", "user": {"__typename": "User", "id": "1", "name": "Ada"}});
        let cache = Cache::new(config_with(TransportResponse { data: Some(data), error: None }));
        let vars = Variables::new();
        let outcome = futures::executor::block_on(cache.execute_query("query Q { user { id name } }", None, vars, CachePolicy::NetworkOnly)).unwrap();
        assert_eq!(outcome.source, MaterializeSource::Complete);
    }

    #[test]
    fn watch_query_emits_on_relevant_change() {
        let cache = Cache::new(config_with(TransportResponse { data: None, error: None }));
        let data = serde_json_bytes::json!({"__typename": "Query", "user": {"__typename": "User", "id": "1", "name": "Ada"}});
        let vars = Variables::new();
        cache.write_query("query Q { user { id name } }", None, &vars, &data).unwrap();

        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        cache
            .watch_query("query Q { user { id name } }", None, vars.clone(), move |data| {
                seen_clone.borrow_mut().push(data.clone());
            })
            .unwrap();
        assert_eq!(seen.borrow().len(), 1);

        let updated = serde_json_bytes::json!({"__typename": "Query", "user": {"__typename": "User", "id": "1", "name": "Grace"}});
        cache.write_query("query Q { user { id name } }", None, &vars, &updated).unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn read_query_hot_flips_true_on_repeat_reads() {
        let cache = Cache::new(config_with(TransportResponse { data: None, error: None }));
        let data = serde_json_bytes::json!({"__typename": "Query", "user": {"__typename": "User", "id": "1", "name": "Ada"}});
        let vars = Variables::new();
        cache.write_query("query Q { user { id name } }", None, &vars, &data).unwrap();

        let first = cache.read_query("query Q { user { id name } }", None, &vars).unwrap();
        assert!(!first.hot);
        let second = cache.read_query("query Q { user { id name } }", None, &vars).unwrap();
        assert!(second.hot);

        let updated = serde_json_bytes::json!({"__typename": "Query", "user": {"__typename": "User", "id": "1", "name": "Grace"}});
        cache.write_query("query Q { user { id name } }", None, &vars, &updated).unwrap();
        let after_write = cache.read_query("query Q { user { id name } }", None, &vars).unwrap();
        assert!(!after_write.hot);
    }

    #[test]
    fn cache_and_network_emits_cached_value_before_resolving_with_network() {
        let data = serde_json_bytes::json!({"__typename": "Query", "user": {"__typename": "User", "id": "1", "name": "Ada"}});
        let cache = Cache::new(config_with(TransportResponse {
            data: Some(serde_json_bytes::json!({"__typename": "Query", "user": {"__typename": "User", "id": "1", "name": "Grace"}})),
            error: None,
        }));
        let vars = Variables::new();
        cache.write_query("query Q { user { id name } }", None, &vars, &data).unwrap();

        let emitted = Rc::new(StdRefCell::new(Vec::new()));
        let emitted_clone = emitted.clone();
        let outcome = futures::executor::block_on(cache.execute_query_with_cache_data(
            "query Q { user { id name } }",
            None,
            vars,
            CachePolicy::CacheAndNetwork,
            move |data| emitted_clone.borrow_mut().push(data.clone()),
        ))
        .unwrap();

        assert_eq!(emitted.borrow().len(), 1);
        assert_eq!(
            emitted.borrow()[0].as_object().unwrap().get("user").unwrap().as_object().unwrap().get("name").unwrap().as_str(),
            Some("Ada")
        );
        assert_eq!(
            outcome.data.unwrap().as_object().unwrap().get("user").unwrap().as_object().unwrap().get("name").unwrap().as_str(),
            Some("Grace")
        );
    }
}
