//! 配置模块：网关客户端的全部可调参数，支持 YAML 文件与环境变量覆盖。
//!
//! # Configuration
//!
//! [`GatewayConfig`] aggregates the per-component configs. Every field has a
//! default, so a YAML document only needs the keys it changes:
//!
//! ```yaml
//! base_url: https://platform.example.com/api/jobs
//! throttle:
//!   requests_per_second: 5
//! retry:
//!   max_retries: 2
//!   base_delay_ms: 500
//! cache:
//!   ttl_ms: 60000
//! ```
//!
//! Environment variables (`GATEWAY_*`) are applied on top with
//! [`GatewayConfig::apply_env`].

use crate::batch::BatchConfig;
use crate::cache::CacheConfig;
use crate::dedup::DedupConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::RetryConfig;
use crate::resilience::throttle::ThrottleConfig;
use crate::telemetry::MetricsConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PLATFORM_HOST: &str = "http://localhost:8080";
pub const API_PATH: &str = "/api/jobs";
pub const DEFAULT_API_VERSION: &str = "1.0";

/// (De)serialize a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Same as [`duration_ms`] for optional durations.
pub(crate) mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Settings for the reqwest transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Overall per-call timeout.
    pub timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
    pub proxy_url: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            pool_max_idle_per_host: 32,
            pool_idle_timeout_secs: 90,
            proxy_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL relative descriptor URLs are joined to.
    pub base_url: String,
    /// Value of the `X-API-Version` header.
    pub api_version: String,
    pub transport: TransportSettings,
    pub throttle: ThrottleConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
    pub batch: BatchConfig,
    pub metrics: MetricsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: format!("{DEFAULT_PLATFORM_HOST}{API_PATH}"),
            api_version: DEFAULT_API_VERSION.to_string(),
            transport: TransportSettings::default(),
            throttle: ThrottleConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            dedup: DedupConfig::default(),
            batch: BatchConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: GatewayConfig = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new().with_source("config_loader"),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            Error::Configuration { message, context } => Error::Configuration {
                message,
                context: context.with_details(format!("file: {}", path.display())),
            },
            other => other,
        })
    }

    /// Apply `GATEWAY_*` environment overrides.
    ///
    /// - `GATEWAY_PLATFORM_HOST`: host the `/api/jobs` path is appended to
    /// - `GATEWAY_BASE_URL`: full base URL (wins over the platform host)
    /// - `GATEWAY_RPS`, `GATEWAY_MAX_RETRIES`, `GATEWAY_CACHE_TTL_SECS`
    /// - `GATEWAY_BREAKER_FAILURE_THRESHOLD`, `GATEWAY_BREAKER_COOLDOWN_SECS`
    /// - `GATEWAY_HTTP_TIMEOUT_SECS`, `GATEWAY_HTTP_POOL_MAX_IDLE_PER_HOST`, `GATEWAY_PROXY_URL`
    pub fn apply_env(mut self) -> Self {
        if let Ok(host) = env::var("GATEWAY_PLATFORM_HOST") {
            self.base_url = format!("{}{}", host.trim_end_matches('/'), API_PATH);
        }
        if let Ok(base) = env::var("GATEWAY_BASE_URL") {
            self.base_url = base;
        }
        if let Some(rps) = env_parse::<f64>("GATEWAY_RPS") {
            self.throttle.requests_per_second = rps;
        }
        if let Some(n) = env_parse::<u32>("GATEWAY_MAX_RETRIES") {
            self.retry.max_retries = n;
        }
        if let Some(secs) = env_parse::<u64>("GATEWAY_CACHE_TTL_SECS") {
            self.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<u32>("GATEWAY_BREAKER_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("GATEWAY_BREAKER_COOLDOWN_SECS") {
            self.circuit_breaker.cooldown = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_parse::<u64>("GATEWAY_HTTP_TIMEOUT_SECS") {
            self.transport.timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(n) = env_parse::<usize>("GATEWAY_HTTP_POOL_MAX_IDLE_PER_HOST") {
            self.transport.pool_max_idle_per_host = n;
        }
        if let Ok(proxy) = env::var("GATEWAY_PROXY_URL") {
            self.transport.proxy_url = Some(proxy);
        }
        self
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, msg: &str| {
            Err(Error::configuration_with_context(
                msg.to_string(),
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("config_validator"),
            ))
        };

        if url::Url::parse(&self.base_url).is_err() {
            return invalid("base_url", "base_url must be an absolute URL");
        }
        let rps = self.throttle.requests_per_second;
        if !rps.is_finite() || rps < 0.0 {
            return invalid("throttle.requests_per_second", "must be a finite, non-negative number");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold", "must be at least 1");
        }
        if self.circuit_breaker.half_open_requests == 0 {
            return invalid("circuit_breaker.half_open_requests", "must be at least 1");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier", "must be >= 1");
        }
        if self.cache.max_entries == 0 {
            return invalid("cache.max_entries", "must be at least 1");
        }
        if self.batch.max_batch_size == 0 {
            return invalid("batch.max_batch_size", "must be at least 1");
        }
        if self.metrics.max_samples == 0 {
            return invalid("metrics.max_samples", "must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.base_url, "http://localhost:8080/api/jobs");
        assert_eq!(cfg.api_version, "1.0");
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(cfg.cache.ttl, Duration::from_secs(300));
        assert_eq!(cfg.batch.max_batch_size, 20);
        assert_eq!(cfg.batch.batch_delay, Duration::from_millis(50));
        assert_eq!(cfg.metrics.max_samples, 10_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_override() {
        let cfg = GatewayConfig::from_yaml_str(
            r#"
base_url: https://platform.example.com/api/jobs
throttle:
  requests_per_second: 5
retry:
  max_retries: 2
  base_delay_ms: 250
circuit_breaker:
  failure_threshold: 3
  cooldown_ms: 10000
cache:
  ttl_ms: 60000
  max_entries: 8
"#,
        )
        .unwrap();

        assert_eq!(cfg.base_url, "https://platform.example.com/api/jobs");
        assert_eq!(cfg.throttle.requests_per_second, 5.0);
        assert_eq!(cfg.retry.max_retries, 2);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(250));
        assert_eq!(cfg.retry.multiplier, 2.0);
        assert_eq!(cfg.circuit_breaker.failure_threshold, 3);
        assert_eq!(cfg.circuit_breaker.cooldown, Duration::from_secs(10));
        assert_eq!(cfg.cache.ttl, Duration::from_secs(60));
        assert_eq!(cfg.cache.max_entries, 8);
        // untouched sections keep defaults
        assert_eq!(cfg.batch.max_batch_size, 20);
    }

    #[test]
    fn test_yaml_rejects_invalid_values() {
        let err = GatewayConfig::from_yaml_str("retry:\n  multiplier: 0.5\n").unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("retry.multiplier"));

        assert!(GatewayConfig::from_yaml_str("base_url: not a url\n").is_err());
        assert!(GatewayConfig::from_yaml_str("throttle:\n  requests_per_second: -1\n").is_err());
    }

    #[test]
    fn test_yaml_syntax_error_is_configuration_error() {
        let err = GatewayConfig::from_yaml_str("retry: [unclosed").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
