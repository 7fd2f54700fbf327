use crate::batch::{BatchAggregator, BatchConfig, BatchTarget};
use crate::cache::{CacheKey, ResponseCache};
use crate::client::dispatch::Dispatcher;
use crate::client::signals::SignalsSnapshot;
use crate::config::GatewayConfig;
use crate::dedup::RequestDeduplicator;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retry::RetryPolicy;
use crate::resilience::throttle::RequestQueue;
use crate::telemetry::{MetricsRecorder, PerformanceMetrics};
use crate::types::{ApiResponse, RequestDescriptor};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) struct Inner {
    pub(crate) config: GatewayConfig,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) queue: RequestQueue,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) retry: RetryPolicy,
    pub(crate) cache: ResponseCache,
    pub(crate) dedup: RequestDeduplicator,
    pub(crate) metrics: Arc<MetricsRecorder>,
    pub(crate) batcher: OnceLock<Arc<BatchAggregator>>,
}

/// Resilient gateway client.
///
/// Reads go through the cache, then the deduplicator, then
/// `retry( breaker( queue ) )`; writes skip the first two. Clones are cheap
/// and share every component.
#[derive(Clone)]
pub struct GatewayClient {
    pub(crate) inner: Arc<Inner>,
}

impl GatewayClient {
    /// Client over the HTTP transport with no authentication.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        crate::client::builder::GatewayClientBuilder::new()
            .config(config)
            .build()
    }

    pub fn builder() -> crate::client::builder::GatewayClientBuilder {
        crate::client::builder::GatewayClientBuilder::new()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        self.execute_inner(descriptor, None).await
    }

    /// Like [`execute`](Self::execute), abandoned when `cancel` fires while
    /// the request is still queued or waiting to retry. Cancellable reads are
    /// never joined with other callers.
    pub async fn execute_cancellable(
        &self,
        descriptor: RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<ApiResponse> {
        self.execute_inner(descriptor, Some(cancel)).await
    }

    async fn execute_inner(
        &self,
        descriptor: RequestDescriptor,
        cancel: Option<CancellationToken>,
    ) -> Result<ApiResponse> {
        if !descriptor.method.is_get() {
            return self.resilient(descriptor, cancel).await;
        }

        let key = CacheKey::for_request(&descriptor);
        if let Some(hit) = self.inner.cache.get(&key) {
            debug!(url = descriptor.url.as_str(), "cache hit");
            return Ok(hit);
        }

        if cancel.is_some() {
            let response = self.resilient(descriptor, cancel).await?;
            self.store(key, &response);
            return Ok(response);
        }

        let client = self.clone();
        let cache_key = key.clone();
        self.inner
            .dedup
            .dedupe(key, move || async move {
                let response = client.resilient(descriptor, None).await?;
                client.store(cache_key, &response);
                Ok(response)
            })
            .await
    }

    fn store(&self, key: CacheKey, response: &ApiResponse) {
        if response.status == 200 {
            self.inner.cache.set(key, response.clone());
        }
    }

    /// `retry( breaker( queue.enqueue ) )`.
    pub(crate) async fn resilient(
        &self,
        descriptor: RequestDescriptor,
        cancel: Option<CancellationToken>,
    ) -> Result<ApiResponse> {
        let inner = &*self.inner;
        inner
            .retry
            .run_cancellable(
                || {
                    let attempt = descriptor.clone();
                    let token = cancel.clone();
                    async move {
                        inner
                            .breaker
                            .execute(|| inner.queue.enqueue_cancellable(attempt, token))
                            .await
                    }
                },
                cancel.as_ref(),
            )
            .await
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<ApiResponse> {
        self.execute(RequestDescriptor::get(url)).await
    }

    pub async fn get_with_params(
        &self,
        url: impl Into<String>,
        params: BTreeMap<String, Value>,
    ) -> Result<ApiResponse> {
        let mut descriptor = RequestDescriptor::get(url);
        descriptor.params = Some(params);
        self.execute(descriptor).await
    }

    /// GET and deserialize the payload.
    pub async fn get_json<T: DeserializeOwned>(&self, url: impl Into<String>) -> Result<T> {
        self.get(url).await?.json()
    }

    pub async fn post(&self, url: impl Into<String>, body: Value) -> Result<ApiResponse> {
        self.execute(RequestDescriptor::post(url, body)).await
    }

    pub async fn put(&self, url: impl Into<String>, body: Value) -> Result<ApiResponse> {
        self.execute(RequestDescriptor::put(url, body)).await
    }

    pub async fn patch(&self, url: impl Into<String>, body: Value) -> Result<ApiResponse> {
        self.execute(RequestDescriptor::patch(url, body)).await
    }

    pub async fn delete(&self, url: impl Into<String>) -> Result<ApiResponse> {
        self.execute(RequestDescriptor::delete(url)).await
    }

    /// Shared aggregator built from the configured batch settings.
    pub fn batcher(&self) -> Arc<BatchAggregator> {
        Arc::clone(self.inner.batcher.get_or_init(|| {
            Arc::new(BatchAggregator::new(
                self.inner.config.batch.clone(),
                self.batch_target(),
            ))
        }))
    }

    /// Independent aggregator with its own window and settings.
    pub fn batcher_with(&self, config: BatchConfig) -> Arc<BatchAggregator> {
        Arc::new(BatchAggregator::new(config, self.batch_target()))
    }

    fn batch_target(&self) -> Arc<dyn BatchTarget> {
        Arc::new(ClientTarget(Arc::downgrade(&self.inner)))
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn performance(&self, window: Duration) -> PerformanceMetrics {
        self.inner.metrics.metrics(window)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Drop cached responses whose request URL matches `pattern`.
    pub fn invalidate_cache(&self, pattern: &str) -> Result<usize> {
        let re = Regex::new(pattern).map_err(|e| {
            Error::validation_with_context(
                e.to_string(),
                ErrorContext::new()
                    .with_field_path("pattern")
                    .with_source("cache_invalidation"),
            )
        })?;
        Ok(self.inner.cache.invalidate_matching(&re))
    }

    pub fn signals(&self) -> SignalsSnapshot {
        SignalsSnapshot {
            circuit_breaker: self.inner.breaker.snapshot(),
            queue: self.inner.queue.snapshot(),
            cache: self.inner.cache.stats(),
            cache_entries: self.inner.cache.len(),
            dedup_inflight: self.inner.dedup.inflight(),
            metric_samples: self.inner.metrics.len(),
        }
    }
}

/// Batch sink that does not keep the client alive.
struct ClientTarget(Weak<Inner>);

impl ClientTarget {
    fn client(&self) -> Result<GatewayClient> {
        self.0
            .upgrade()
            .map(|inner| GatewayClient { inner })
            .ok_or_else(|| {
                Error::runtime_with_context(
                    "gateway client dropped",
                    ErrorContext::new().with_source("batch_aggregator"),
                )
            })
    }
}

#[async_trait]
impl BatchTarget for ClientTarget {
    async fn send_batch(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        self.client()?.resilient(descriptor, None).await
    }

    async fn send_single(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        self.client()?.execute(descriptor).await
    }
}
