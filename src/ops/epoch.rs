//! Per-signature epoch guard against stale network responses (§4.6, §7).
//!
//! Every in-flight network fetch is tagged with the epoch current for its
//! signature at issue time; a response only applies if that epoch is still
//! current when the response arrives, otherwise it is dropped as stale.

use crate::error::StaleResponseError;
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Default)]
pub struct EpochGuard {
    current: RefCell<HashMap<String, u64>>,
}

impl EpochGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps and returns the new epoch for `signature`, to be attached to
    /// the network request about to be issued.
    pub fn advance(&self, signature: &str) -> u64 {
        let mut map = self.current.borrow_mut();
        let entry = map.entry(signature.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn current(&self, signature: &str) -> u64 {
        *self.current.borrow().get(signature).unwrap_or(&0)
    }

    /// Rejects a response carrying a superseded epoch, mirroring the
    /// `version < stored_version` stale-activation guard pattern: an older
    /// epoch than what is now current is dropped rather than applied.
    pub fn accept(&self, signature: &str, observed_epoch: u64) -> Result<(), StaleResponseError> {
        let current = self.current(signature);
        if observed_epoch < current {
            tracing::warn!(signature, observed_epoch, current, "dropped stale response");
            return Err(StaleResponseError {
                signature: signature.to_string(),
                observed: observed_epoch,
                current,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_request_supersedes_earlier_epoch() {
        let guard = EpochGuard::new();
        let first = guard.advance("sig");
        let second = guard.advance("sig");
        assert!(second > first);
        assert!(guard.accept("sig", first).is_err());
        assert!(guard.accept("sig", second).is_ok());
    }

    #[test]
    fn unknown_signature_starts_at_epoch_zero() {
        let guard = EpochGuard::new();
        assert_eq!(guard.current("never-seen"), 0);
    }
}
