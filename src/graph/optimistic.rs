//! Optimistic overlay stack (§4.2).

use super::record::Record;
use std::collections::HashMap;

/// One named overlay: a set of full-record shadows. A record present in an
/// overlay is never partially merged with the layer below it — reading an
/// id present in an overlay returns that overlay's whole record (§4.2
/// invariant).
#[derive(Debug, Default)]
pub struct OptimisticLayer {
    pub records: HashMap<String, Record>,
}

#[derive(Debug, Default)]
pub struct OptimisticStack {
    layers: Vec<(String, OptimisticLayer)>,
}

impl OptimisticStack {
    pub fn push(&mut self, name: String) {
        self.layers.push((name, OptimisticLayer::default()));
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn top_name(&self) -> Option<&str> {
        self.layers.last().map(|(name, _)| name.as_str())
    }

    /// Reads in stack order, most recent overlay first (§4.2).
    pub fn read(&self, id: &str) -> Option<&Record> {
        self.layers
            .iter()
            .rev()
            .find_map(|(_, layer)| layer.records.get(id))
    }

    pub fn top_mut(&mut self) -> Option<&mut OptimisticLayer> {
        self.layers.last_mut().map(|(_, layer)| layer)
    }

    /// Removes the named overlay without emitting anything further — the
    /// caller is expected to have already written the confirmed state
    /// directly to the base graph (§4.2: "commit removes the overlay").
    pub fn commit(&mut self, name: &str) -> bool {
        if let Some(pos) = self.layers.iter().position(|(n, _)| n == name) {
            self.layers.remove(pos);
            true
        } else {
            false
        }
    }

    /// Removes the named overlay and returns the ids it shadowed, so the
    /// caller can `touch` each of them (§4.2: "rollback additionally emits
    /// touch for every record the overlay shadowed").
    pub fn rollback(&mut self, name: &str) -> Vec<String> {
        if let Some(pos) = self.layers.iter().position(|(n, _)| n == name) {
            let (_, layer) = self.layers.remove(pos);
            layer.records.into_keys().collect()
        } else {
            Vec::new()
        }
    }
}
