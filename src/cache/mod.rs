//! 响应缓存模块：按请求签名缓存 GET 成功响应，带 TTL 与容量上限。
//!
//! # Response Caching Module
//!
//! Successful GET responses are kept in memory so repeated reads of the same
//! resource skip the network, the throttle queue and the circuit breaker.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseCache`] | TTL-bounded store with insertion-order eviction |
//! | [`CacheConfig`] | `enabled`, `ttl_ms`, `max_entries` |
//! | [`CacheStats`] | Hit, miss, eviction and expiration counters |
//! | [`CacheKey`] | Content signature shared with the deduplicator |
//!
//! ## Example
//!
//! ```rust
//! use marketplace_gateway::cache::{CacheConfig, CacheKey, ResponseCache};
//! use marketplace_gateway::types::{ApiResponse, RequestDescriptor};
//! use std::time::Duration;
//!
//! let cache = ResponseCache::new(CacheConfig::new().with_ttl(Duration::from_secs(60)));
//! let key = CacheKey::for_request(&RequestDescriptor::get("/jobs"));
//! cache.set(key.clone(), ApiResponse::new(200, serde_json::json!([])));
//! assert!(cache.get(&key).is_some());
//! ```
//!
//! ## Cache Key Generation
//!
//! Keys hash the method, URL, query params and body. Headers are not part of
//! the key, so two callers with different auth see the same entry.

mod key;
mod store;

pub use key::{CacheKey, CacheKeyGenerator};
pub use store::{CacheConfig, CacheStats, ResponseCache};
