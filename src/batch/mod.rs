//! 请求批处理模块：将短时间内的多个请求合并为一次批量调用。
//!
//! # Request Batching Module
//!
//! Submissions arriving close together are pooled into a window and sent as a
//! single `POST /batch` call. Each caller still receives its own outcome,
//! matched back by request id.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchAggregator`] | Window owner: collects, flushes, fans results out |
//! | [`BatchConfig`] | `max_batch_size`, `batch_delay_ms`, `endpoint` |
//! | [`BatchTarget`] | Where envelopes and fallback singles are sent |
//! | [`BatchResult`] | Per-index summary returned by `submit_all` |
//! | [`wire`] | Request and response envelope types |
//!
//! ## Flush rules
//!
//! - the window reaches `max_batch_size` (default 20)
//! - `batch_delay` (default 50 ms) passes with no new submission
//! - [`BatchAggregator::flush`] is called
//!
//! Members missing from the response get a 500 "No response received" item
//! error. If the batch call itself fails, every member is re-sent on its own,
//! in parallel.
//!
//! ## Example
//!
//! ```rust,no_run
//! use marketplace_gateway::{GatewayClient, RequestDescriptor};
//!
//! # async fn run(client: GatewayClient) -> marketplace_gateway::Result<()> {
//! let batcher = client.batcher();
//! let job = batcher.submit(RequestDescriptor::get("/jobs/42")).await?;
//! println!("{}", job.data);
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod report;
pub mod wire;

pub use aggregator::{BatchAggregator, BatchConfig, BatchStats, BatchTarget};
pub use report::BatchResult;
