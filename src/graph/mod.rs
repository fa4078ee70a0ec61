//! Entity graph store (§4.2).

pub mod optimistic;
pub mod record;

pub use record::Record;

use self::optimistic::OptimisticStack;
use crate::value::StoredValue;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

type ChangeCallback = Box<dyn Fn(&HashSet<String>)>;

/// The flat record store. `Graph` is deliberately built on `RefCell`, not a
/// mutex: §5 assumes single-threaded cooperative access with no internal
/// locking, and `RefCell`'s `Send`-but-not-`Sync` auto traits fall out of
/// that assumption for free.
pub struct Graph {
    base: RefCell<HashMap<String, Record>>,
    overlays: RefCell<OptimisticStack>,
    /// Name of the overlay writes should land in, if any `modifyOptimistic`
    /// call is currently on the stack.
    active_overlay: RefCell<Option<String>>,
    on_change: ChangeCallback,
    pending_batch: RefCell<Option<HashSet<String>>>,
}

impl Graph {
    pub fn new(on_change: impl Fn(&HashSet<String>) + 'static) -> Arc<Self> {
        Arc::new(Self {
            base: RefCell::new(HashMap::new()),
            overlays: RefCell::new(OptimisticStack::default()),
            active_overlay: RefCell::new(None),
            on_change: Box::new(on_change),
            pending_batch: RefCell::new(None),
        })
    }

    pub fn get_record(&self, id: &str) -> Option<Record> {
        if let Some(record) = self.overlays.borrow().read(id) {
            return Some(record.clone());
        }
        self.base.borrow().get(id).cloned()
    }

    /// `putRecord(id, patch)` (§4.2): merge-writes fields, creating the
    /// record if absent, and touches `id` in the current batch if the
    /// version actually bumped.
    pub fn put_record(&self, id: &str, patch: IndexMap<String, StoredValue>) {
        let overlay_name = self.active_overlay.borrow().clone();
        let changed = if overlay_name.is_some() {
            let mut overlays = self.overlays.borrow_mut();
            let base_snapshot = self.base.borrow().get(id).cloned();
            let layer = overlays.top_mut().expect("active overlay must exist on stack");
            let record = layer.records.entry(id.to_string()).or_insert_with(|| base_snapshot.unwrap_or_default());
            record.apply_patch(patch)
        } else {
            let mut base = self.base.borrow_mut();
            let record = base.entry(id.to_string()).or_insert_with(Record::new);
            record.apply_patch(patch)
        };
        if changed {
            trace!(record_id = id, "putRecord bumped version");
            self.touch(id);
        }
    }

    /// Publishes `id` into the current change batch without altering
    /// fields (§4.2).
    pub fn touch(&self, id: &str) {
        match self.pending_batch.borrow_mut().as_mut() {
            Some(set) => {
                set.insert(id.to_string());
            }
            None => {
                let mut set = HashSet::new();
                set.insert(id.to_string());
                (self.on_change)(&set);
            }
        }
    }

    /// `batch(fn)` (§4.2): all writes inside `f` accumulate into one
    /// change set delivered once after `f` returns. Nested batches simply
    /// extend the outer one; only the outermost call delivers.
    pub fn batch<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let is_outermost = self.pending_batch.borrow().is_none();
        if is_outermost {
            *self.pending_batch.borrow_mut() = Some(HashSet::new());
        }
        let result = f(self);
        if is_outermost {
            if let Some(touched) = self.pending_batch.borrow_mut().take() {
                if !touched.is_empty() {
                    (self.on_change)(&touched);
                }
            }
        }
        result
    }

    /// Opens a named optimistic overlay for the duration of `f` (§6.2
    /// `modifyOptimistic`). Writes performed by `f` land in the overlay
    /// instead of the base graph. Takes an explicit `Arc` handle (rather
    /// than an `Arc<Self>` receiver) so the returned handle can outlive
    /// the call without relying on unstable arbitrary self types.
    pub fn begin_optimistic(graph: &Arc<Graph>, name: impl Into<String>, f: impl FnOnce(&Graph)) -> OptimisticHandle {
        let name = name.into();
        graph.overlays.borrow_mut().push(name.clone());
        let previous = graph.active_overlay.replace(Some(name.clone()));
        f(graph);
        *graph.active_overlay.borrow_mut() = previous;
        OptimisticHandle { graph: graph.clone(), name, resolved: Cell::new(false) }
    }

    /// A clone of every base record, for `dehydrate` (§6.4). Overlays are
    /// never persisted — they are transient in-flight optimistic state.
    pub fn snapshot_records(&self) -> HashMap<String, Record> {
        self.base.borrow().clone()
    }

    /// Replaces the base graph wholesale and touches every new/changed id
    /// (§6.4 `hydrate`), so watchers reconcile against the restored state.
    pub fn replace_base(&self, records: HashMap<String, Record>) {
        let touched: HashSet<String> = records.keys().cloned().collect();
        *self.base.borrow_mut() = records;
        if !touched.is_empty() {
            match self.pending_batch.borrow_mut().as_mut() {
                Some(batch) => batch.extend(touched),
                None => (self.on_change)(&touched),
            }
        }
    }

    fn commit_overlay(&self, name: &str) {
        self.overlays.borrow_mut().commit(name);
    }

    fn rollback_overlay(&self, name: &str) {
        let touched = self.overlays.borrow_mut().rollback(name);
        if !touched.is_empty() {
            let set: HashSet<String> = touched.into_iter().collect();
            match self.pending_batch.borrow_mut().as_mut() {
                Some(batch) => batch.extend(set),
                None => (self.on_change)(&set),
            }
        }
    }
}

/// Returned by [`Graph::begin_optimistic`]; `commit` or `rollback`
/// consumes it exactly once.
pub struct OptimisticHandle {
    graph: Arc<Graph>,
    name: String,
    resolved: Cell<bool>,
}

impl OptimisticHandle {
    pub fn commit(self) {
        self.graph.commit_overlay(&self.name);
        self.resolved.set(true);
    }

    pub fn rollback(self) {
        self.graph.rollback_overlay(&self.name);
        self.resolved.set(true);
    }
}

impl Drop for OptimisticHandle {
    fn drop(&mut self) {
        if !self.resolved.get() {
            self.graph.rollback_overlay(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StoredValue;
    use serde_json_bytes::Value as JsonValue;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    fn patch(pairs: &[(&str, StoredValue)]) -> IndexMap<String, StoredValue> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn put_record_bumps_version_only_on_change() {
        let touched = Rc::new(StdRefCell::new(Vec::new()));
        let touched_clone = touched.clone();
        let graph = Graph::new(move |ids| touched_clone.borrow_mut().push(ids.clone()));
        graph.put_record("User:1", patch(&[("name", StoredValue::Scalar(JsonValue::String("a".into())))]));
        assert_eq!(graph.get_record("User:1").unwrap().version, 1);
        graph.put_record("User:1", patch(&[("name", StoredValue::Scalar(JsonValue::String("a".into())))]));
        assert_eq!(graph.get_record("User:1").unwrap().version, 1);
        graph.put_record("User:1", patch(&[("name", StoredValue::Scalar(JsonValue::String("b".into())))]));
        assert_eq!(graph.get_record("User:1").unwrap().version, 2);
        assert_eq!(touched.borrow().len(), 2);
    }

    #[test]
    fn batch_delivers_a_single_change_set() {
        let touched = Rc::new(StdRefCell::new(Vec::new()));
        let touched_clone = touched.clone();
        let graph = Graph::new(move |ids| touched_clone.borrow_mut().push(ids.clone()));
        graph.batch(|g| {
            g.put_record("User:1", patch(&[("name", StoredValue::Scalar(JsonValue::String("a".into())))]));
            g.put_record("User:2", patch(&[("name", StoredValue::Scalar(JsonValue::String("b".into())))]));
        });
        assert_eq!(touched.borrow().len(), 1);
        assert_eq!(touched.borrow()[0].len(), 2);
    }

    #[test]
    fn optimistic_overlay_shadows_base_until_rollback() {
        let graph = Graph::new(|_| {});
        graph.put_record("User:1", patch(&[("name", StoredValue::Scalar(JsonValue::String("base".into())))]));
        let handle = Graph::begin_optimistic(&graph, "opt-1", |g| {
            g.put_record("User:1", patch(&[("name", StoredValue::Scalar(JsonValue::String("optimistic".into())))]));
        });
        let name = graph.get_record("User:1").unwrap().fields.get("name").unwrap().clone();
        assert_eq!(name, StoredValue::Scalar(JsonValue::String("optimistic".into())));
        handle.rollback();
        let name = graph.get_record("User:1").unwrap().fields.get("name").unwrap().clone();
        assert_eq!(name, StoredValue::Scalar(JsonValue::String("base".into())));
    }
}
