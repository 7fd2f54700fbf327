//! 请求去重模块：合并并发的相同请求，使其共享一次后端调用。
//!
//! # Request Deduplication
//!
//! Concurrent callers issuing the same request (same [`CacheKey`]) share one
//! underlying call. The completed result, success or failure, stays joinable
//! for a short window so callers arriving just after settlement also reuse it.
//!
//! ```rust
//! use marketplace_gateway::dedup::{DedupConfig, RequestDeduplicator};
//! use std::time::Duration;
//!
//! let dedup = RequestDeduplicator::new(DedupConfig::new().with_window(Duration::from_millis(100)));
//! assert_eq!(dedup.inflight(), 0);
//! ```

use crate::cache::CacheKey;
use crate::config::duration_ms;
use crate::types::ApiResponse;
use crate::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    /// How long a settled result stays joinable.
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_millis(100),
        }
    }
}

impl DedupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

type SharedCall = Shared<BoxFuture<'static, Result<ApiResponse>>>;

struct Slot {
    generation: u64,
    call: SharedCall,
}

/// Coalesces identical concurrent requests onto one shared future.
///
/// Each registered call is driven by a background task, so it completes even
/// if every caller stops waiting. That task removes the map entry `window`
/// after settlement, unless a newer call has replaced it.
pub struct RequestDeduplicator {
    config: DedupConfig,
    inflight: Arc<Mutex<HashMap<CacheKey, Slot>>>,
    generation: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
}

impl RequestDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Run `request_fn` unless an identical call is in flight or settled
    /// within the window, in which case its result is shared.
    pub async fn dedupe<F, Fut>(&self, key: CacheKey, request_fn: F) -> Result<ApiResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiResponse>> + Send + 'static,
    {
        if !self.config.enabled {
            return request_fn().await;
        }

        let call = {
            let mut map = self.lock();
            if let Some(slot) = map.get(&key) {
                self.joined.fetch_add(1, Ordering::Relaxed);
                debug!(url = key.url.as_str(), "joining in-flight request");
                slot.call.clone()
            } else {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let call: SharedCall = request_fn().boxed().shared();
                map.insert(
                    key.clone(),
                    Slot {
                        generation,
                        call: call.clone(),
                    },
                );
                self.started.fetch_add(1, Ordering::Relaxed);
                self.spawn_cleanup(key, generation, call.clone());
                call
            }
        };

        call.await
    }

    fn spawn_cleanup(&self, key: CacheKey, generation: u64, call: SharedCall) {
        let inflight = Arc::clone(&self.inflight);
        let window = self.config.window;
        tokio::spawn(async move {
            let _ = call.await;
            if !window.is_zero() {
                tokio::time::sleep(window).await;
            }
            let mut map = inflight.lock().unwrap_or_else(|e| e.into_inner());
            if map.get(&key).is_some_and(|slot| slot.generation == generation) {
                map.remove(&key);
            }
        });
    }

    /// Keys currently joinable, including settled results inside the window.
    pub fn inflight(&self) -> usize {
        self.lock().len()
    }

    /// Calls that actually reached the wrapped function.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Callers served by someone else's call.
    pub fn joined(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }

    /// Forget all entries. Running calls still finish for their callers.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestDescriptor;
    use crate::Error;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn key(url: &str) -> CacheKey {
        CacheKey::for_request(&RequestDescriptor::get(url))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_requests_share_one_call() {
        let dedup = RequestDeduplicator::default();
        let calls = Arc::new(AtomicU32::new(0));

        let run = || {
            let calls = Arc::clone(&calls);
            dedup.dedupe(key("/jobs"), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(ApiResponse::new(200, json!({"jobs": []})))
            })
        };
        let (a, b, c) = tokio::join!(run(), run(), run());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.as_ref().unwrap().clone());
        assert_eq!(c.unwrap().data, json!({"jobs": []}));
        assert_eq!(dedup.joined(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_shared_within_window() {
        let dedup = RequestDeduplicator::default();
        let calls = Arc::new(AtomicU32::new(0));

        let call = |calls: Arc<AtomicU32>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<ApiResponse, _>(Error::Remote {
                    status: 500,
                    message: "boom".into(),
                    retry_after_ms: None,
                    body: None,
                })
            }
        };

        let first = dedup.dedupe(key("/x"), call(Arc::clone(&calls))).await;
        assert_eq!(first.unwrap_err().status(), Some(500));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = dedup.dedupe(key("/x"), call(Arc::clone(&calls))).await;
        assert_eq!(second.unwrap_err().status(), Some(500));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_removed_after_window() {
        let dedup = RequestDeduplicator::default();
        let calls = Arc::new(AtomicU32::new(0));
        let call = |calls: Arc<AtomicU32>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ApiResponse::new(200, json!(null)))
            }
        };

        dedup.dedupe(key("/y"), call(Arc::clone(&calls))).await.unwrap();
        assert_eq!(dedup.inflight(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(dedup.inflight(), 0);

        dedup.dedupe(key("/y"), call(Arc::clone(&calls))).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dedup.started(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_do_not_join() {
        let dedup = RequestDeduplicator::default();
        let (a, b) = tokio::join!(
            dedup.dedupe(key("/a"), || async { Ok(ApiResponse::new(200, json!("a"))) }),
            dedup.dedupe(key("/b"), || async { Ok(ApiResponse::new(200, json!("b"))) }),
        );
        assert_eq!(a.unwrap().data, json!("a"));
        assert_eq!(b.unwrap().data, json!("b"));
        assert_eq!(dedup.joined(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_passes_through() {
        let dedup = RequestDeduplicator::new(DedupConfig::new().with_enabled(false));
        let calls = Arc::new(AtomicU32::new(0));
        let run = || {
            let calls = Arc::clone(&calls);
            dedup.dedupe(key("/z"), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ApiResponse::new(200, json!(null)))
            })
        };
        let _ = tokio::join!(run(), run());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dedup.inflight(), 0);
    }
}
