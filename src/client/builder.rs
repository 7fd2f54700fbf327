use crate::batch::BatchConfig;
use crate::cache::{CacheConfig, ResponseCache};
use crate::client::auth::{AuthProvider, NoAuth};
use crate::client::core::{GatewayClient, Inner};
use crate::client::dispatch::Dispatcher;
use crate::config::GatewayConfig;
use crate::dedup::{DedupConfig, RequestDeduplicator};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::retry::{RetryConfig, RetryPolicy};
use crate::resilience::throttle::{RequestQueue, ThrottleConfig};
use crate::telemetry::MetricsRecorder;
use crate::transport::{HttpTransport, Transport};
use crate::Result;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Builder for [`GatewayClient`].
///
/// Everything is optional: without a transport the reqwest transport is
/// built from `config.transport`, without an auth provider requests go out
/// anonymously, and without a recorder a private one is created.
pub struct GatewayClientBuilder {
    config: GatewayConfig,
    transport: Option<Arc<dyn Transport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl GatewayClientBuilder {
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            transport: None,
            auth: None,
            metrics: None,
        }
    }

    /// Start from defaults with `GATEWAY_*` environment overrides.
    pub fn from_env() -> Self {
        Self::new().config(GatewayConfig::from_env())
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Share a recorder between several clients.
    pub fn metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn requests_per_second(mut self, rps: f64) -> Self {
        self.config.throttle = ThrottleConfig {
            requests_per_second: rps,
        };
        self
    }

    pub fn circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = cfg;
        self
    }

    pub fn retry(mut self, cfg: RetryConfig) -> Self {
        self.config.retry = cfg;
        self
    }

    pub fn cache(mut self, cfg: CacheConfig) -> Self {
        self.config.cache = cfg;
        self
    }

    pub fn dedup(mut self, cfg: DedupConfig) -> Self {
        self.config.dedup = cfg;
        self
    }

    pub fn batch(mut self, cfg: BatchConfig) -> Self {
        self.config.batch = cfg;
        self
    }

    /// Validate the configuration and wire the components together.
    ///
    /// No task is spawned here; the queue and batch windows start on first
    /// use, so building outside a runtime is fine.
    pub fn build(self) -> Result<GatewayClient> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&config.transport)?),
        };
        let auth = self.auth.unwrap_or_else(|| Arc::new(NoAuth));
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(MetricsRecorder::new(config.metrics.clone())));

        let dispatcher = Arc::new(Dispatcher::new(
            config.base_url.clone(),
            config.api_version.clone(),
            Arc::clone(&transport),
            auth,
            Arc::clone(&metrics),
        ));

        info!(
            base_url = config.base_url.as_str(),
            transport = transport.name(),
            rps = config.throttle.requests_per_second,
            "gateway client ready"
        );

        let inner = Inner {
            queue: RequestQueue::new(config.throttle.clone(), Arc::clone(&dispatcher)),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            cache: ResponseCache::new(config.cache.clone()),
            dedup: RequestDeduplicator::new(config.dedup.clone()),
            dispatcher,
            metrics,
            batcher: OnceLock::new(),
            config,
        };
        Ok(GatewayClient {
            inner: Arc::new(inner),
        })
    }
}

impl Default for GatewayClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
