//! 弹性模式模块：熔断器、请求节流队列与指数退避重试。
//!
//! # Resilience Primitives Module
//!
//! The three policies that sit between the facade and the transport. The
//! facade composes them as `retry( breaker( queue.enqueue ) )`, so every retry
//! attempt is re-admitted by the breaker and re-queued behind the throttle.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Closed / Open / HalfOpen failure isolation |
//! | [`throttle`] | FIFO queue enforcing a minimum spacing between dispatches |
//! | [`retry`] | Bounded exponential backoff honouring `Retry-After` on 429 |
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use marketplace_gateway::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(5)
//!     .with_cooldown(Duration::from_secs(30))
//!     .with_half_open_requests(2);
//! let breaker = CircuitBreaker::new(config);
//!
//! if breaker.acquire().is_ok() {
//!     // Make the call...
//!     breaker.on_success();
//! }
//! ```
//!
//! ## Retry
//!
//! ```rust
//! use marketplace_gateway::resilience::retry::{RetryConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(
//!     RetryConfig::new()
//!         .with_max_retries(3)
//!         .with_base_delay(Duration::from_millis(1000))
//!         .with_multiplier(2.0),
//! );
//! # let _ = policy;
//! ```

pub mod circuit_breaker;
pub mod retry;
pub mod throttle;
