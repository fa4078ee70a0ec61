//! Suspension window (§4.6): a short interval after a terminal emit in
//! which repeat queries for the same strict signature reuse the last
//! result instead of refetching.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct SuspensionWindow {
    last_emit: RefCell<HashMap<String, Instant>>,
}

impl SuspensionWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a terminal emit (data or non-stale error) for `signature`
    /// (§4.6).
    pub fn record(&self, signature: &str) {
        self.last_emit.borrow_mut().insert(signature.to_string(), Instant::now());
    }

    /// Whether a query for `signature` falls inside the suspension window
    /// and should return cached data immediately without fetching.
    pub fn is_suspended(&self, signature: &str, timeout: Duration) -> bool {
        self.last_emit
            .borrow()
            .get(signature)
            .is_some_and(|at| at.elapsed() < timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspends_immediately_after_a_recorded_emit() {
        let window = SuspensionWindow::new();
        window.record("sig");
        assert!(window.is_suspended("sig", Duration::from_millis(1000)));
    }

    #[test]
    fn unknown_signature_is_never_suspended() {
        let window = SuspensionWindow::new();
        assert!(!window.is_suspended("never-seen", Duration::from_millis(1000)));
    }

    #[test]
    fn zero_timeout_never_suspends() {
        let window = SuspensionWindow::new();
        window.record("sig");
        assert!(!window.is_suspended("sig", Duration::from_millis(0)));
    }
}
