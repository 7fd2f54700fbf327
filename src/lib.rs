//! # marketplace-gateway
//!
//! 这是求职与合伙人撮合平台前端的弹性 API 网关客户端，负责把任意出站调用变成可靠、限速、去重、可缓存、可批量的网络操作。
//!
//! Resilient API gateway client for a job / freelance / co-founder
//! marketplace. It turns outbound calls to the platform backend into
//! rate-controlled, deduplicated, cached and batchable operations, and keeps
//! live performance metrics while doing so.
//!
//! ## Request path
//!
//! ```text
//! GET   : cache → dedup → retry( breaker( queue ) ) → dispatcher → transport
//! write : retry( breaker( queue ) ) → dispatcher → transport
//! batch : aggregator → POST /batch through the write path
//!         (falls back to one call per member if the batch call fails)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marketplace_gateway::{GatewayClient, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> marketplace_gateway::Result<()> {
//!     let client = GatewayClient::new(GatewayConfig::from_env())?;
//!
//!     let job = client.get("/jobs/42").await?;
//!     println!("{}", job.data);
//!
//!     let m = client.performance(std::time::Duration::from_secs(60));
//!     println!("p95 {} ms, error rate {:.2}", m.p95_ms, m.error_rate);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Facade, builder, dispatcher and auth providers |
//! | [`resilience`] | Circuit breaker, request throttle, retry policy |
//! | [`cache`] | TTL response cache with FIFO eviction |
//! | [`dedup`] | In-flight request coalescing |
//! | [`batch`] | Batch window, wire envelopes, fallback |
//! | [`telemetry`] | Per-attempt samples and windowed aggregates |
//! | [`transport`] | `Transport` trait, reqwest and scripted implementations |
//! | [`config`] | `GatewayConfig` from YAML and `GATEWAY_*` variables |
//! | [`types`] | Request descriptors and responses |

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod dedup;
pub mod resilience;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use batch::{BatchAggregator, BatchConfig, BatchResult};
pub use client::{AuthProvider, GatewayClient, GatewayClientBuilder, SignalsSnapshot};
pub use config::GatewayConfig;
pub use telemetry::{MetricsRecorder, PerformanceMetrics};
pub use types::{ApiResponse, HttpMethod, RequestDescriptor};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorClass, ErrorContext};
