//! Mutation/subscription root allocation (§3.5, §4.6 scenario F).

use crate::keys::{RootIdAllocator, QUERY_ROOT};
use crate::plan::PlanOperation;

/// Picks the record id a compiled operation's response should normalize
/// under: `@` for queries (a single shared root so repeated queries
/// collapse), a freshly allocated `@mutation.N`/`@subscription.N` for
/// mutations/subscriptions (history retained, never collapsed — §3.5).
pub fn root_for_operation(allocator: &RootIdAllocator, operation: PlanOperation) -> String {
    match operation {
        PlanOperation::Query | PlanOperation::Fragment => QUERY_ROOT.to_string(),
        PlanOperation::Mutation => allocator.next_mutation_root(),
        PlanOperation::Subscription => allocator.next_subscription_root(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_mutations_get_distinct_roots() {
        let allocator = RootIdAllocator::new();
        let first = root_for_operation(&allocator, PlanOperation::Mutation);
        let second = root_for_operation(&allocator, PlanOperation::Mutation);
        assert_ne!(first, second);
        assert_eq!(first, "@mutation.0");
        assert_eq!(second, "@mutation.1");
    }

    #[test]
    fn queries_always_share_the_root() {
        let allocator = RootIdAllocator::new();
        assert_eq!(root_for_operation(&allocator, PlanOperation::Query), "@");
        assert_eq!(root_for_operation(&allocator, PlanOperation::Query), "@");
    }
}
