//! 网关客户端模块：组合缓存、去重、重试、熔断与节流的统一入口。
//!
//! # Gateway Client
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`GatewayClient`] | Facade: `execute`, `get`, `post`, ..., batching, snapshots |
//! | [`GatewayClientBuilder`] | Injects config, transport, auth and a shared recorder |
//! | [`Dispatcher`] | Builds the wire request, attaches auth, handles 401 refresh |
//! | [`AuthProvider`] | Token source: [`NoAuth`], [`StaticTokenProvider`], [`KeyringTokenProvider`] |
//! | [`SignalsSnapshot`] | Breaker, queue, cache and dedup state at a glance |
//!
//! ```rust,no_run
//! use marketplace_gateway::client::{GatewayClient, KeyringTokenProvider};
//! use std::sync::Arc;
//!
//! # async fn run() -> marketplace_gateway::Result<()> {
//! let client = GatewayClient::builder()
//!     .base_url("https://platform.example/api/jobs")
//!     .auth(Arc::new(KeyringTokenProvider::new("marketplace-gateway", "default")))
//!     .build()?;
//!
//! let jobs = client.get("/open").await?;
//! println!("{}", jobs.data);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod builder;
pub mod core;
pub mod dispatch;
pub mod headers;
pub mod signals;

pub use auth::{AuthProvider, KeyringTokenProvider, NoAuth, StaticTokenProvider};
pub use builder::GatewayClientBuilder;
pub use core::GatewayClient;
pub use dispatch::Dispatcher;
pub use signals::SignalsSnapshot;
