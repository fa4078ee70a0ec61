//! Records (§3.2).

use crate::value::StoredValue;
use indexmap::IndexMap;

/// A mapping from field key to value, carrying a monotonic version number
/// (§3.2, invariant 1). Records are never partially merged from two
/// sources at once — a single `Record` is always either wholly base or
/// wholly inside one optimistic overlay (§4.2).
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub fields: IndexMap<String, StoredValue>,
    pub version: u64,
}

impl Record {
    pub fn new() -> Self {
        Self { fields: IndexMap::new(), version: 0 }
    }

    pub fn get(&self, field_key: &str) -> Option<&StoredValue> {
        self.fields.get(field_key)
    }

    /// Merge-writes `patch` onto this record's fields and bumps the
    /// version by exactly one if any field's value actually changed (by
    /// structural equality), per §4.2's `putRecord`. Returns whether the
    /// version was bumped.
    pub fn apply_patch(&mut self, patch: IndexMap<String, StoredValue>) -> bool {
        let mut changed = false;
        for (key, value) in patch {
            let differs = match self.fields.get(&key) {
                Some(existing) => existing != &value,
                None => true,
            };
            if differs {
                changed = true;
            }
            self.fields.insert(key, value);
        }
        if changed {
            self.version += 1;
        }
        changed
    }
}
