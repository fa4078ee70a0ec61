//! Cache policy decision table (§4.6).

use crate::document::materialize::MaterializeSource;

/// One of the four fetch policies a query/fragment read can specify
/// (§4.6, mirroring Apollo/urql's `fetchPolicy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    CacheOnly,
    CacheFirst,
    CacheAndNetwork,
    NetworkOnly,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::CacheFirst
    }
}

/// What a policy decision says to do, before any network round-trip
/// actually happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Emit the cached result (if any) as an initial value.
    pub emit_cached: bool,
    /// Issue a network request.
    pub fetch_network: bool,
    /// Fail immediately (cache-only with no usable cache entry) instead
    /// of emitting or fetching.
    pub miss: bool,
}

/// §4.6's decision table, keyed by policy and what materialize reported
/// for the cached entry.
pub fn decide(policy: CachePolicy, source: MaterializeSource) -> Decision {
    match policy {
        CachePolicy::CacheOnly => match source {
            MaterializeSource::Complete => Decision { emit_cached: true, fetch_network: false, miss: false },
            _ => Decision { emit_cached: false, fetch_network: false, miss: true },
        },
        CachePolicy::CacheFirst => match source {
            MaterializeSource::Complete => Decision { emit_cached: true, fetch_network: false, miss: false },
            _ => Decision { emit_cached: false, fetch_network: true, miss: false },
        },
        CachePolicy::CacheAndNetwork => match source {
            MaterializeSource::Complete => Decision { emit_cached: true, fetch_network: true, miss: false },
            _ => Decision { emit_cached: false, fetch_network: true, miss: false },
        },
        CachePolicy::NetworkOnly => Decision { emit_cached: false, fetch_network: true, miss: false },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_only_misses_without_a_complete_entry() {
        let decision = decide(CachePolicy::CacheOnly, MaterializeSource::Partial);
        assert!(decision.miss);
        assert!(!decision.fetch_network);
    }

    #[test]
    fn cache_and_network_always_fetches() {
        let decision = decide(CachePolicy::CacheAndNetwork, MaterializeSource::Complete);
        assert!(decision.emit_cached);
        assert!(decision.fetch_network);
    }

    #[test]
    fn cache_first_skips_network_on_a_complete_hit() {
        let decision = decide(CachePolicy::CacheFirst, MaterializeSource::Complete);
        assert!(decision.emit_cached);
        assert!(!decision.fetch_network);
    }
}
