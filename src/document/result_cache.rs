//! Materialized-result cache (§4.6).

use crate::plan::SignatureMode;
use multimap::MultiMap;
use std::collections::HashMap;

/// Composite key identifying one cached materialization: a plan, its
/// masked variables, the signature mode it was computed under, whether a
/// `@nonreactive`/fingerprint-only read was requested, and the root it
/// was read from (§4.6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub plan_id: u64,
    pub masked_vars: String,
    pub mode: SignatureMode,
    pub fingerprint_only: bool,
    pub root_id: String,
}

#[derive(Debug, Clone)]
pub struct CachedResult {
    pub data: serde_json_bytes::Value,
    pub fingerprint: u64,
}

/// Caches materialized results, indexed a second time by every record id
/// they depend on so a single `putRecord` touch can invalidate every
/// affected entry without a full scan (§4.6, §4.7).
#[derive(Default)]
pub struct ResultCache {
    entries: HashMap<CacheKey, CachedResult>,
    dependents: MultiMap<String, CacheKey>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CachedResult> {
        self.entries.get(key)
    }

    /// `hot` read (§4.5): the cached entry is returned only when its
    /// stored fingerprint still matches what materialize would recompute,
    /// letting the caller skip a full materialize pass when nothing the
    /// plan reads has actually changed.
    pub fn get_hot(&self, key: &CacheKey, current_fingerprint: u64) -> Option<&CachedResult> {
        self.entries.get(key).filter(|entry| entry.fingerprint == current_fingerprint)
    }

    pub fn insert(&mut self, key: CacheKey, data: serde_json_bytes::Value, fingerprint: u64, dependencies: impl IntoIterator<Item = String>) {
        for id in dependencies {
            self.dependents.insert(id, key.clone());
        }
        self.entries.insert(key, CachedResult { data, fingerprint });
    }

    /// Evicts every cached entry depending on any of `ids` (§4.7's watcher
    /// invalidation shares this same reverse index).
    pub fn invalidate(&mut self, ids: &std::collections::HashSet<String>) {
        let mut to_remove = Vec::new();
        for id in ids {
            if let Some(keys) = self.dependents.get_vec(id) {
                to_remove.extend(keys.iter().cloned());
            }
        }
        for key in &to_remove {
            self.entries.remove(key);
        }
        for id in ids {
            self.dependents.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json_bytes::Value as JsonValue;
    use std::collections::HashSet;

    fn key(root: &str) -> CacheKey {
        CacheKey {
            plan_id: 1,
            masked_vars: "{}".to_string(),
            mode: SignatureMode::Strict,
            fingerprint_only: false,
            root_id: root.to_string(),
        }
    }

    #[test]
    fn invalidate_evicts_only_dependent_entries() {
        let mut cache = ResultCache::new();
        cache.insert(key("@"), JsonValue::Null, 1, vec!["User:1".to_string()]);
        cache.insert(key("@mutation.0"), JsonValue::Null, 2, vec!["User:2".to_string()]);

        let mut touched = HashSet::new();
        touched.insert("User:1".to_string());
        cache.invalidate(&touched);

        assert!(cache.get(&key("@")).is_none());
        assert!(cache.get(&key("@mutation.0")).is_some());
    }

    #[test]
    fn hot_read_requires_matching_fingerprint() {
        let mut cache = ResultCache::new();
        cache.insert(key("@"), JsonValue::Null, 42, vec!["User:1".to_string()]);
        assert!(cache.get_hot(&key("@"), 42).is_some());
        assert!(cache.get_hot(&key("@"), 43).is_none());
    }
}
