//! 遥测模块：按请求记录耗时与状态，并按时间窗口聚合性能指标。
//!
//! # Telemetry Module
//!
//! Every attempt that reaches the transport leaves exactly one
//! [`MetricSample`] in a bounded ring. Aggregates are computed on demand over
//! a trailing time window.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MetricsRecorder`] | Ring buffer plus window aggregation |
//! | [`MetricSample`] | Endpoint, method, status, duration, sizes of one attempt |
//! | [`PerformanceMetrics`] | Totals, error rate, average, p95/p99, throughput |
//! | [`MetricsConfig`] | Ring capacity (`max_samples`) |
//!
//! Quantiles use the floor index of the duration-sorted window, so with 100
//! samples of 1..=100 ms, p95 is 96 ms and p99 is 100 ms.
//!
//! ```rust
//! use marketplace_gateway::telemetry::{MetricSample, MetricsRecorder};
//! use std::time::Duration;
//!
//! let recorder = MetricsRecorder::default();
//! recorder.record(MetricSample::new("/jobs", "GET", 200, Duration::from_millis(42)));
//! let m = recorder.metrics(Duration::from_secs(60));
//! assert_eq!(m.total_requests, 1);
//! ```

mod metrics;

pub use metrics::{MetricSample, MetricsConfig, MetricsRecorder, PerformanceMetrics};
