use crate::config::duration_ms;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub failure_count: u32,
    pub half_open_successes: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(rename = "cooldown_ms", with = "duration_ms")]
    pub cooldown: Duration,
    /// Consecutive half-open successes needed to close again.
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            half_open_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the cooldown duration
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_half_open_requests(mut self, n: u32) -> Self {
        self.half_open_requests = n.max(1);
        self
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<Instant>,
    half_open_successes: u32,
}

/// Three-state circuit breaker, one per backend.
///
/// - Closed: calls pass; `failure_threshold` consecutive failures open it
/// - Open: calls fail fast with [`Error::CircuitOpen`] until the cooldown ends
/// - HalfOpen: calls pass as probes; `half_open_requests` successes close it,
///   any failure reopens it with a fresh cooldown
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                failure_count: 0,
                next_attempt_at: None,
                half_open_successes: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every critical section leaves State consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admission check. Moves Open to HalfOpen once the cooldown has elapsed.
    pub fn acquire(&self) -> Result<()> {
        let mut st = self.lock();
        if st.state != CircuitState::Open {
            return Ok(());
        }
        let now = Instant::now();
        match st.next_attempt_at {
            Some(at) if now < at => Err(Error::CircuitOpen {
                retry_in_ms: at.duration_since(now).as_millis() as u64,
            }),
            _ => {
                st.state = CircuitState::HalfOpen;
                st.half_open_successes = 0;
                st.next_attempt_at = None;
                info!("circuit breaker half-open, probing backend");
                Ok(())
            }
        }
    }

    pub fn on_success(&self) {
        let mut st = self.lock();
        match st.state {
            CircuitState::HalfOpen => {
                st.half_open_successes = st.half_open_successes.saturating_add(1);
                if st.half_open_successes >= self.cfg.half_open_requests {
                    st.state = CircuitState::Closed;
                    st.failure_count = 0;
                    st.half_open_successes = 0;
                    info!("circuit breaker closed");
                }
            }
            CircuitState::Closed => st.failure_count = 0,
            // A call admitted before the breaker opened; it does not close it early.
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut st = self.lock();
        match st.state {
            CircuitState::HalfOpen => {
                st.state = CircuitState::Open;
                st.half_open_successes = 0;
                st.next_attempt_at = Some(Instant::now() + self.cfg.cooldown);
                warn!(
                    cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                    "circuit breaker re-opened by failed probe"
                );
            }
            CircuitState::Closed => {
                st.failure_count = st.failure_count.saturating_add(1);
                if st.failure_count >= self.cfg.failure_threshold {
                    st.state = CircuitState::Open;
                    st.next_attempt_at = Some(Instant::now() + self.cfg.cooldown);
                    warn!(
                        failures = st.failure_count,
                        cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `f` under the breaker.
    ///
    /// Network errors and 5xx count as failures. Any other HTTP answer means
    /// the backend is reachable and counts as success. Local errors
    /// (cancellation, configuration) leave the state untouched.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire()?;
        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_backend_failure() {
                    self.on_failure();
                } else if err.status().is_some() || matches!(err, Error::Authentication { .. }) {
                    self.on_success();
                }
                Err(err)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn reset(&self) {
        let mut st = self.lock();
        st.state = CircuitState::Closed;
        st.failure_count = 0;
        st.next_attempt_at = None;
        st.half_open_successes = 0;
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.next_attempt_at) {
            (CircuitState::Open, Some(until)) if until > now => {
                Some((until - now).as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            failure_count: st.failure_count,
            half_open_successes: st.half_open_successes,
            open_remaining_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error() -> Error {
        Error::Remote {
            status: 503,
            message: "unavailable".into(),
            retry_after_ms: None,
            body: None,
        }
    }

    fn breaker(threshold: u32, cooldown_ms: u64, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_cooldown(Duration::from_millis(cooldown_ms))
                .with_half_open_requests(half_open),
        )
    }

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::from_secs(60));
        assert_eq!(config.half_open_requests, 3);
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let cb = breaker(5, 1000, 1);
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.snapshot().failure_count, 2);

        cb.on_success();
        assert_eq!(cb.snapshot().failure_count, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_breaker_opens_at_threshold() {
        let cb = breaker(3, 10_000, 1);
        cb.on_failure();
        cb.on_failure();
        assert!(cb.acquire().is_ok());

        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        let err = cb.acquire().unwrap_err();
        assert!(err.is_circuit_open());
        assert!(cb.snapshot().open_remaining_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_then_closed() {
        let cb = breaker(2, 50, 2);
        cb.on_failure();
        cb.on_failure();
        assert!(cb.acquire().is_err());

        tokio::time::advance(Duration::from_millis(50)).await;

        assert!(cb.acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_cooldown() {
        let cb = breaker(1, 100, 3);
        cb.on_failure();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.acquire().is_ok());

        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        let remaining = cb.snapshot().open_remaining_ms.unwrap();
        assert!(remaining > 90, "fresh cooldown expected, got {remaining}ms");
    }

    #[tokio::test]
    async fn test_execute_counts_only_backend_failures() {
        let cb = breaker(2, 10_000, 1);

        let not_found: Result<()> = cb
            .execute(|| async {
                Err(Error::Remote {
                    status: 404,
                    message: "missing".into(),
                    retry_after_ms: None,
                    body: None,
                })
            })
            .await;
        assert!(not_found.is_err());
        assert_eq!(cb.snapshot().failure_count, 0);

        let _ = cb.execute(|| async { Err::<(), _>(server_error()) }).await;
        let _ = cb.execute(|| async { Err::<(), _>(server_error()) }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let mut invoked = false;
        let rejected = cb
            .execute(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert!(rejected.unwrap_err().is_circuit_open());
        assert!(!invoked);
    }

    #[test]
    fn test_reset() {
        let cb = breaker(1, 10_000, 1);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.acquire().is_ok());
    }

    #[test]
    fn test_circuit_breaker_thread_safe() {
        use std::sync::Arc;
        use std::thread;

        let cb = Arc::new(breaker(100, 1000, 1));
        let mut handles = vec![];
        for _ in 0..10 {
            let cb_clone = Arc::clone(&cb);
            handles.push(thread::spawn(move || {
                for _ in 0..5 {
                    cb_clone.on_failure();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.snapshot().failure_count, 50);
    }
}
