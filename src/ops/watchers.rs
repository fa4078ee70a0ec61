//! Watcher registry (§4.7): a reverse index from record id to the
//! watchers depending on it, notified in registration order on
//! `onChange(touchedIds)`.
//!
//! This registry only owns the reverse index and delivery order. Whether a
//! notified watcher actually re-materializes and emits (steps 2-3 of §4.7)
//! is the caller's business — each watcher's callback closes over the
//! plan/graph access it needs, set up by whoever registers it (the cache
//! facade).

use indexmap::IndexMap;
use multimap::MultiMap;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;

pub type WatcherId = u64;

struct WatcherEntry {
    dependencies: HashSet<String>,
    callback: Box<dyn Fn(&HashSet<String>)>,
}

#[derive(Default)]
pub struct WatcherRegistry {
    next_id: Cell<WatcherId>,
    watchers: RefCell<IndexMap<WatcherId, WatcherEntry>>,
    reverse_index: RefCell<MultiMap<String, WatcherId>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new watcher with its initial dependency set (§4.7).
    /// Ids are assigned monotonically, so registration order is simply id
    /// order.
    pub fn register(&self, dependencies: HashSet<String>, callback: impl Fn(&HashSet<String>) + 'static) -> WatcherId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        for dep in &dependencies {
            self.reverse_index.borrow_mut().insert(dep.clone(), id);
        }
        self.watchers.borrow_mut().insert(id, WatcherEntry { dependencies, callback: Box::new(callback) });
        id
    }

    /// Re-derives a watcher's dependency set after it re-materializes
    /// (§4.7: "a dependency set that is re-derived on every emission").
    pub fn update_dependencies(&self, id: WatcherId, new_dependencies: HashSet<String>) {
        let mut watchers = self.watchers.borrow_mut();
        let Some(entry) = watchers.get_mut(&id) else { return };
        let old = std::mem::replace(&mut entry.dependencies, new_dependencies.clone());
        let mut index = self.reverse_index.borrow_mut();
        for dep in &old {
            if let Some(ids) = index.get_vec_mut(dep) {
                ids.retain(|&w| w != id);
            }
        }
        for dep in &new_dependencies {
            index.insert(dep.clone(), id);
        }
    }

    pub fn unregister(&self, id: WatcherId) {
        let Some(entry) = self.watchers.borrow_mut().shift_remove(&id) else { return };
        let mut index = self.reverse_index.borrow_mut();
        for dep in &entry.dependencies {
            if let Some(ids) = index.get_vec_mut(dep) {
                ids.retain(|&w| w != id);
            }
        }
    }

    /// `onChange(touchedIds)` (§4.7 step 1): unions every watcher whose
    /// dependency set intersects `touched`, then invokes each exactly once
    /// in registration order.
    pub fn notify(&self, touched: &HashSet<String>) {
        let mut matched = Vec::new();
        let mut seen = HashSet::new();
        {
            let index = self.reverse_index.borrow();
            for id_str in touched {
                if let Some(ids) = index.get_vec(id_str) {
                    for &watcher_id in ids {
                        if seen.insert(watcher_id) {
                            matched.push(watcher_id);
                        }
                    }
                }
            }
        }
        matched.sort_unstable();
        let watchers = self.watchers.borrow();
        for id in matched {
            if let Some(entry) = watchers.get(&id) {
                (entry.callback)(touched);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.watchers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn only_watchers_whose_dependencies_intersect_touched_are_notified() {
        let registry = WatcherRegistry::new();
        let calls = Rc::new(StdRefCell::new(Vec::new()));

        let calls_a = calls.clone();
        registry.register(["User:1".to_string()].into_iter().collect(), move |_| calls_a.borrow_mut().push("a"));
        let calls_b = calls.clone();
        registry.register(["User:2".to_string()].into_iter().collect(), move |_| calls_b.borrow_mut().push("b"));

        let touched: HashSet<String> = ["User:1".to_string()].into_iter().collect();
        registry.notify(&touched);
        assert_eq!(*calls.borrow(), vec!["a"]);
    }

    #[test]
    fn notifies_in_registration_order() {
        let registry = WatcherRegistry::new();
        let calls = Rc::new(StdRefCell::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let calls = calls.clone();
            registry.register(["User:1".to_string()].into_iter().collect(), move |_| calls.borrow_mut().push(label));
        }

        let touched: HashSet<String> = ["User:1".to_string()].into_iter().collect();
        registry.notify(&touched);
        assert_eq!(*calls.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unregister_removes_from_reverse_index() {
        let registry = WatcherRegistry::new();
        let calls = Rc::new(StdRefCell::new(0));
        let calls_clone = calls.clone();
        let id = registry.register(["User:1".to_string()].into_iter().collect(), move |_| *calls_clone.borrow_mut() += 1);
        registry.unregister(id);
        let touched: HashSet<String> = ["User:1".to_string()].into_iter().collect();
        registry.notify(&touched);
        assert_eq!(*calls.borrow(), 0);
    }
}
