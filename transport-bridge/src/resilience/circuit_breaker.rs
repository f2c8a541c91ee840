//! Consecutive-failure circuit breaker.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{info, warn};

const CIRCUIT_BREAKER_TAG: &str = "CircuitBreaker:";

/// Trips after a configured number of consecutive failures and closes again
/// on the next success. While tripped, the owning port throttles its intake;
/// the breaker itself never blocks anything.
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: AtomicU32,
    tripped: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_failures: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Any success resets the count and closes a tripped circuit.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.tripped.swap(false, Ordering::AcqRel) {
            info!("{CIRCUIT_BREAKER_TAG} closed after a successful message");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold && !self.tripped.swap(true, Ordering::AcqRel) {
            warn!(
                "{CIRCUIT_BREAKER_TAG} tripped after {failures} consecutive failures; throttling intake"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CircuitBreaker;

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::new(3);
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3);
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_tripped());
        breaker.record_failure();
        assert!(breaker.is_tripped());
    }

    #[test]
    fn success_resets_the_count() {
        let breaker = CircuitBreaker::new(3);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn success_closes_a_tripped_circuit() {
        let breaker = CircuitBreaker::new(1);
        breaker.record_failure();
        assert!(breaker.is_tripped());
        breaker.record_success();
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
