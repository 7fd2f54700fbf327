use crate::cache::CacheStats;
use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use crate::resilience::throttle::QueueSnapshot;

/// Point-in-time view of a client's runtime state.
///
/// Facts only: callers decide what to do with them (back off, show a banner,
/// route elsewhere).
#[derive(Debug, Clone)]
pub struct SignalsSnapshot {
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub queue: QueueSnapshot,
    pub cache: CacheStats,
    pub cache_entries: usize,
    pub dedup_inflight: usize,
    pub metric_samples: usize,
}
