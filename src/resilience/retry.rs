//! Retry controller: bounded exponential backoff.

use crate::config::{duration_ms, opt_duration_ms};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Configuration for retry logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Optional ceiling for the computed delay. `Retry-After` is not capped.
    #[serde(rename = "max_delay_ms", with = "opt_duration_ms")]
    pub max_delay: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: None,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_multiplier(mut self, m: f64) -> Self {
        self.multiplier = m.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }
}

/// Wraps a call with retries.
///
/// - 4xx other than 429, circuit-open, auth and local errors surface immediately
/// - network errors, 5xx and 429 are retried while retries remain
/// - each retry waits `delay`, then `delay *= multiplier`
/// - a 429 carrying `Retry-After` replaces the delay of the retry that follows
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn next_delay(&self, current: Duration) -> Duration {
        // Saturates instead of overflowing for huge multipliers.
        let next = Duration::try_from_secs_f64(current.as_secs_f64() * self.config.multiplier)
            .unwrap_or(Duration::MAX);
        match self.config.max_delay {
            Some(cap) => next.min(cap),
            None => next,
        }
    }

    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_cancellable(op, None).await
    }

    /// Like [`run`](Self::run); a cancelled token aborts the backoff wait.
    pub async fn run_cancellable<F, Fut, T>(
        &self,
        mut op: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut remaining = self.config.max_retries;
        let mut delay = match self.config.max_delay {
            Some(cap) => self.config.base_delay.min(cap),
            None => self.config.base_delay,
        };
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || remaining == 0 {
                return Err(err);
            }

            let wait = err.retry_after().unwrap_or(delay);
            info!(
                attempt,
                retries_left = remaining,
                delay_ms = wait.as_millis() as u64,
                error_class = err.class().as_str(),
                "retrying after failure"
            );

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = token.cancelled() => return Err(Error::Cancelled),
                    }
                }
                None => tokio::time::sleep(wait).await,
            }

            remaining -= 1;
            delay = self.next_delay(delay);
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
