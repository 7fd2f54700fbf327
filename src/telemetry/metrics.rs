//! Rolling request metrics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Ring capacity; the oldest sample is dropped once it is full.
    pub max_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { max_samples: 10_000 }
    }
}

impl MetricsConfig {
    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = n.max(1);
        self
    }
}

/// One transport attempt.
#[derive(Debug, Clone)]
pub struct MetricSample {
    /// Request path without query string.
    pub endpoint: String,
    pub method: String,
    pub duration: Duration,
    /// HTTP status, `0` when no response arrived.
    pub status: u16,
    pub timestamp: Instant,
    pub error: Option<String>,
    pub request_size: Option<usize>,
    pub response_size: Option<usize>,
}

impl MetricSample {
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status: u16,
        duration: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            duration,
            status,
            timestamp: Instant::now(),
            error: None,
            request_size: None,
            response_size: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_sizes(mut self, request: Option<usize>, response: Option<usize>) -> Self {
        self.request_size = request;
        self.response_size = response;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.status == 0 || self.status >= 400
    }
}

/// Aggregate over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub average_duration_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub error_rate: f64,
    pub requests_per_second: f64,
}

impl PerformanceMetrics {
    fn from_samples<'a>(samples: impl Iterator<Item = &'a MetricSample>, window: Duration) -> Self {
        let mut durations = Vec::new();
        let mut successful = 0;
        let mut failed = 0;
        for s in samples {
            durations.push(s.duration.as_secs_f64() * 1000.0);
            if s.is_success() {
                successful += 1;
            }
            if s.is_failure() {
                failed += 1;
            }
        }

        let total = durations.len();
        if total == 0 {
            return Self::default();
        }
        durations.sort_by(|a, b| a.total_cmp(b));

        let quantile = |q: f64| {
            let idx = ((total as f64 * q).floor() as usize).min(total - 1);
            durations[idx]
        };
        let window_secs = window.as_secs_f64();

        Self {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            average_duration_ms: durations.iter().sum::<f64>() / total as f64,
            p95_ms: quantile(0.95),
            p99_ms: quantile(0.99),
            error_rate: failed as f64 / total as f64,
            requests_per_second: if window_secs > 0.0 {
                total as f64 / window_secs
            } else {
                0.0
            },
        }
    }
}

/// Bounded in-memory ring of [`MetricSample`]s.
///
/// Shared by every clone of a client; `record` is called once per transport
/// attempt by the dispatcher.
pub struct MetricsRecorder {
    config: MetricsConfig,
    samples: Mutex<VecDeque<MetricSample>>,
}

impl MetricsRecorder {
    /// A zero `max_samples` is raised to 1.
    pub fn new(mut config: MetricsConfig) -> Self {
        config.max_samples = config.max_samples.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(config.max_samples.min(1024))),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MetricSample>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, sample: MetricSample) {
        let mut samples = self.lock();
        while samples.len() >= self.config.max_samples.max(1) {
            if samples.pop_front().is_none() {
                break;
            }
        }
        samples.push_back(sample);
    }

    fn window_start(window: Duration) -> Option<Instant> {
        Instant::now().checked_sub(window)
    }

    fn in_window(sample: &MetricSample, start: Option<Instant>) -> bool {
        start.map_or(true, |s| sample.timestamp >= s)
    }

    pub fn metrics(&self, window: Duration) -> PerformanceMetrics {
        let start = Self::window_start(window);
        let samples = self.lock();
        PerformanceMetrics::from_samples(
            samples.iter().filter(|s| Self::in_window(s, start)),
            window,
        )
    }

    pub fn endpoint_metrics(&self, endpoint: &str, window: Duration) -> PerformanceMetrics {
        let start = Self::window_start(window);
        let samples = self.lock();
        PerformanceMetrics::from_samples(
            samples
                .iter()
                .filter(|s| s.endpoint == endpoint && Self::in_window(s, start)),
            window,
        )
    }

    /// Distinct endpoints currently in the ring, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut out: Vec<String> = self.lock().iter().map(|s| s.endpoint.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Endpoints ordered by average duration, slowest first.
    pub fn slowest_endpoints(&self, window: Duration, limit: usize) -> Vec<(String, PerformanceMetrics)> {
        let start = Self::window_start(window);
        let samples = self.lock();
        let mut grouped: HashMap<&str, Vec<&MetricSample>> = HashMap::new();
        for s in samples.iter().filter(|s| Self::in_window(s, start)) {
            grouped.entry(s.endpoint.as_str()).or_default().push(s);
        }
        let mut ranked: Vec<(String, PerformanceMetrics)> = grouped
            .into_iter()
            .map(|(endpoint, group)| {
                (
                    endpoint.to_string(),
                    PerformanceMetrics::from_samples(group.into_iter(), window),
                )
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.1.average_duration_ms
                .total_cmp(&a.1.average_duration_ms)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Sample count per status code; `0` counts attempts without a response.
    pub fn status_breakdown(&self, window: Duration) -> BTreeMap<u16, usize> {
        let start = Self::window_start(window);
        let mut out = BTreeMap::new();
        for s in self.lock().iter().filter(|s| Self::in_window(s, start)) {
            *out.entry(s.status).or_insert(0) += 1;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn log_summary(&self, window: Duration) {
        let m = self.metrics(window);
        info!(
            window_secs = window.as_secs(),
            total = m.total_requests,
            failed = m.failed_requests,
            avg_ms = m.average_duration_ms,
            p95_ms = m.p95_ms,
            p99_ms = m.p99_ms,
            error_rate = m.error_rate,
            rps = m.requests_per_second,
            "gateway metrics"
        );
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}
