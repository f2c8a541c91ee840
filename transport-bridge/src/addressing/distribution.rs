//! Distribution strategies for scaled-out destination endpoints.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks one destination address out of the candidates for an endpoint.
pub trait DistributionStrategy: Send + Sync {
    fn select_destination(&self, candidates: &[String]) -> Option<String>;
}

/// Default strategy: rotate through candidates with an atomic counter.
#[derive(Default)]
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributionStrategy for RoundRobinStrategy {
    fn select_destination(&self, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].clone())
    }
}

/// Per-endpoint strategy table; round-robin unless overridden.
#[derive(Default)]
pub struct DistributionPolicy {
    strategies: DashMap<String, Arc<dyn DistributionStrategy>>,
}

impl DistributionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_strategy(&self, endpoint: &str, strategy: Arc<dyn DistributionStrategy>) {
        self.strategies.insert(endpoint.to_string(), strategy);
    }

    pub fn strategy_for(&self, endpoint: &str) -> Arc<dyn DistributionStrategy> {
        self.strategies
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(RoundRobinStrategy::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{DistributionPolicy, DistributionStrategy, RoundRobinStrategy};
    use std::sync::Arc;

    #[test]
    fn round_robin_rotates_through_candidates() {
        let strategy = RoundRobinStrategy::new();
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let picks: Vec<_> = (0..6)
            .map(|_| strategy.select_destination(&candidates).unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn round_robin_handles_empty_candidates() {
        let strategy = RoundRobinStrategy::new();
        assert!(strategy.select_destination(&[]).is_none());
    }

    #[test]
    fn policy_keeps_one_counter_per_endpoint() {
        let policy = DistributionPolicy::new();
        let candidates = vec!["a".to_string(), "b".to_string()];

        let sales = policy.strategy_for("sales");
        assert_eq!(sales.select_destination(&candidates).as_deref(), Some("a"));
        assert_eq!(sales.select_destination(&candidates).as_deref(), Some("b"));

        // A different endpoint starts its own rotation.
        let billing = policy.strategy_for("billing");
        assert_eq!(billing.select_destination(&candidates).as_deref(), Some("a"));

        // The same endpoint keeps its rotation.
        assert_eq!(
            policy.strategy_for("sales").select_destination(&candidates).as_deref(),
            Some("a")
        );
    }

    struct FirstOnly;

    impl DistributionStrategy for FirstOnly {
        fn select_destination(&self, candidates: &[String]) -> Option<String> {
            candidates.first().cloned()
        }
    }

    #[test]
    fn overrides_replace_the_default_strategy() {
        let policy = DistributionPolicy::new();
        policy.set_strategy("sales", Arc::new(FirstOnly));

        let candidates = vec!["a".to_string(), "b".to_string()];
        for _ in 0..3 {
            assert_eq!(
                policy.strategy_for("sales").select_destination(&candidates).as_deref(),
                Some("a")
            );
        }
    }
}
