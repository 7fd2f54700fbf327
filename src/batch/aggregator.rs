//! Batch window and flush logic.

use super::report::BatchResult;
use super::wire::{self, BatchRequestEnvelope, BatchResponseEnvelope, WireRequest, BATCH_HEADER};
use crate::config::duration_ms;
use crate::types::{ApiResponse, RequestDescriptor};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    /// Idle time after the last submission before a partial window flushes.
    #[serde(rename = "batch_delay_ms", with = "duration_ms")]
    pub batch_delay: Duration,
    pub endpoint: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            batch_delay: Duration::from_millis(50),
            endpoint: "/batch".to_string(),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_batch_size(mut self, s: usize) -> Self {
        self.max_batch_size = s.max(1);
        self
    }
    pub fn with_batch_delay(mut self, d: Duration) -> Self {
        self.batch_delay = d;
        self
    }
    pub fn with_endpoint(mut self, e: impl Into<String>) -> Self {
        self.endpoint = e.into();
        self
    }
}

/// Where flushed batches go.
///
/// `send_batch` carries the envelope POST; `send_single` runs one member on
/// its own when the batch call fails. The gateway client implements both
/// through its ordinary pipeline.
#[async_trait]
pub trait BatchTarget: Send + Sync + 'static {
    async fn send_batch(&self, descriptor: RequestDescriptor) -> Result<ApiResponse>;
    async fn send_single(&self, descriptor: RequestDescriptor) -> Result<ApiResponse>;
}

struct Member {
    descriptor: RequestDescriptor,
    responder: oneshot::Sender<Result<ApiResponse>>,
}

enum Command {
    Submit(Member),
    Flush,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    pub batches_sent: u64,
    pub fallbacks: u64,
}

/// Pools submissions into windows and sends each window as one call.
///
/// A single window task owns the pending list. A window closes when it
/// reaches `max_batch_size` or when `batch_delay` passes without a new
/// submission; every flush then runs in its own task.
pub struct BatchAggregator {
    config: BatchConfig,
    target: Arc<dyn BatchTarget>,
    sender: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    counters: Arc<Counters>,
}

impl BatchAggregator {
    pub fn new(config: BatchConfig, target: Arc<dyn BatchTarget>) -> Self {
        Self {
            config,
            target,
            sender: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn sender(&self) -> mpsc::UnboundedSender<Command> {
        let mut guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_window(
            rx,
            self.config.clone(),
            Arc::clone(&self.target),
            Arc::clone(&self.counters),
        ));
        *guard = Some(tx.clone());
        tx
    }

    /// Add one request to the current window and wait for its own outcome.
    pub async fn submit(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        let (responder, outcome) = oneshot::channel();
        self.sender()
            .send(Command::Submit(Member {
                descriptor,
                responder,
            }))
            .map_err(|_| closed("batch window closed"))?;
        outcome
            .await
            .map_err(|_| closed("batch window dropped the request"))?
    }

    /// Submit every descriptor and collect a per-index summary.
    pub async fn submit_all(&self, descriptors: Vec<RequestDescriptor>) -> BatchResult {
        let start = Instant::now();
        let total = descriptors.len();
        let outcomes =
            futures::future::join_all(descriptors.into_iter().map(|d| self.submit(d))).await;

        let mut result = BatchResult::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(r) => result.add_success(i, r),
                Err(e) => result.add_failure(i, e),
            }
        }
        result.execution_time = start.elapsed();
        result.total_processed = total;
        result
    }

    /// Close the current window now instead of waiting for the idle timer.
    pub fn flush(&self) {
        let _ = self.sender().send(Command::Flush);
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            batches_sent: self.counters.batches.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }
}

fn closed(msg: &str) -> Error {
    Error::runtime_with_context(msg, ErrorContext::new().with_source("batch_aggregator"))
}

async fn run_window(
    mut rx: mpsc::UnboundedReceiver<Command>,
    config: BatchConfig,
    target: Arc<dyn BatchTarget>,
    counters: Arc<Counters>,
) {
    let mut window: Vec<Member> = Vec::new();

    loop {
        let command = if window.is_empty() {
            match rx.recv().await {
                Some(c) => c,
                None => break,
            }
        } else {
            match tokio::time::timeout(config.batch_delay, rx.recv()).await {
                Ok(Some(c)) => c,
                Ok(None) => break,
                Err(_) => {
                    spawn_flush(std::mem::take(&mut window), &config, &target, &counters);
                    continue;
                }
            }
        };

        match command {
            Command::Submit(member) => {
                window.push(member);
                if window.len() >= config.max_batch_size {
                    spawn_flush(std::mem::take(&mut window), &config, &target, &counters);
                }
            }
            Command::Flush => {
                if !window.is_empty() {
                    spawn_flush(std::mem::take(&mut window), &config, &target, &counters);
                }
            }
        }
    }

    // All handles dropped; send whatever is still pending.
    if !window.is_empty() {
        spawn_flush(window, &config, &target, &counters);
    }
}

fn spawn_flush(
    members: Vec<Member>,
    config: &BatchConfig,
    target: &Arc<dyn BatchTarget>,
    counters: &Arc<Counters>,
) {
    tokio::spawn(flush_members(
        members,
        config.endpoint.clone(),
        Arc::clone(target),
        Arc::clone(counters),
    ));
}

async fn flush_members(
    members: Vec<Member>,
    endpoint: String,
    target: Arc<dyn BatchTarget>,
    counters: Arc<Counters>,
) {
    let size = members.len();
    counters.batches.fetch_add(1, Ordering::Relaxed);
    info!(size, endpoint = endpoint.as_str(), "flushing batch");

    let envelope = BatchRequestEnvelope {
        requests: members.iter().map(|m| WireRequest::from(&m.descriptor)).collect(),
    };
    let outcome = match serde_json::to_value(&envelope) {
        Ok(body) => {
            let call = RequestDescriptor::post(endpoint, body).with_header(BATCH_HEADER, "true");
            target
                .send_batch(call)
                .await
                .and_then(|resp| resp.json::<BatchResponseEnvelope>())
        }
        Err(e) => Err(Error::from(e)),
    };

    match outcome {
        Ok(envelope) => {
            if !envelope.errors.is_empty() {
                warn!(errors = ?envelope.errors, "batch response carried envelope errors");
            }
            let mut by_id: HashMap<String, _> = envelope
                .responses
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect();
            for member in members {
                let result = match by_id.remove(&member.descriptor.id) {
                    Some(r) => r.into_result(),
                    None => Err(wire::unmatched(&member.descriptor.id)),
                };
                let _ = member.responder.send(result);
            }
            debug!(size, "batch settled");
        }
        Err(err) => {
            counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            warn!(
                size,
                error = %err,
                "batch call failed, sending members individually"
            );
            let singles = members.into_iter().map(|member| {
                let target = Arc::clone(&target);
                async move {
                    let result = target.send_single(member.descriptor).await;
                    let _ = member.responder.send(result);
                }
            });
            futures::future::join_all(singles).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;

    /// Echoes every member back by id, recording envelopes it saw.
    #[derive(Default)]
    struct EchoTarget {
        batches: StdMutex<Vec<RequestDescriptor>>,
        singles: StdMutex<Vec<RequestDescriptor>>,
        fail_batches: bool,
    }

    #[async_trait]
    impl BatchTarget for EchoTarget {
        async fn send_batch(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
            self.batches.lock().unwrap().push(descriptor.clone());
            if self.fail_batches {
                return Err(Error::Remote {
                    status: 503,
                    message: "batch endpoint down".into(),
                    retry_after_ms: None,
                    body: None,
                });
            }
            let body = descriptor.body.unwrap_or(Value::Null);
            let responses: Vec<Value> = body["requests"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|r| json!({"id": r["id"], "status": 200, "data": {"url": r["url"]}}))
                .collect();
            Ok(ApiResponse::new(200, json!({ "responses": responses })))
        }

        async fn send_single(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
            self.singles.lock().unwrap().push(descriptor.clone());
            Ok(ApiResponse::new(200, json!({"single": descriptor.url})))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timer_flushes_partial_window() {
        let target = Arc::new(EchoTarget::default());
        let agg = BatchAggregator::new(BatchConfig::default(), target.clone());

        let start = Instant::now();
        let (a, b) = tokio::join!(
            agg.submit(RequestDescriptor::get("/a")),
            agg.submit(RequestDescriptor::get("/b")),
        );
        assert_eq!(a.unwrap().data, json!({"url": "/a"}));
        assert_eq!(b.unwrap().data, json!({"url": "/b"}));
        assert!(start.elapsed() >= Duration::from_millis(50));

        let batches = target.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].url, "/batch");
        assert_eq!(
            batches[0].headers.as_ref().unwrap().get(BATCH_HEADER).map(String::as_str),
            Some("true")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_cap_splits_windows() {
        let target = Arc::new(EchoTarget::default());
        let agg = BatchAggregator::new(BatchConfig::new().with_max_batch_size(3), target.clone());

        let descs: Vec<_> = (0..7).map(|i| RequestDescriptor::get(format!("/j/{i}"))).collect();
        let result = agg.submit_all(descs).await;

        assert!(result.all_succeeded());
        assert_eq!(result.total_processed, 7);
        let sizes: Vec<usize> = target
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.body.as_ref().unwrap()["requests"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(agg.stats().batches_sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_falls_back_to_singles() {
        let target = Arc::new(EchoTarget {
            fail_batches: true,
            ..Default::default()
        });
        let agg = BatchAggregator::new(BatchConfig::default(), target.clone());

        let result = agg
            .submit_all(vec![RequestDescriptor::get("/x"), RequestDescriptor::get("/y")])
            .await;
        assert!(result.all_succeeded());
        assert_eq!(result.outcome(1).unwrap().unwrap().data, json!({"single": "/y"}));
        assert_eq!(target.singles.lock().unwrap().len(), 2);
        assert_eq!(agg.stats().fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_flush_skips_idle_wait() {
        let target = Arc::new(EchoTarget::default());
        let agg = BatchAggregator::new(
            BatchConfig::new().with_batch_delay(Duration::from_secs(10)),
            target.clone(),
        );
        let start = Instant::now();
        let pending = agg.submit(RequestDescriptor::get("/now"));
        let flusher = async {
            tokio::task::yield_now().await;
            agg.flush();
        };
        let (res, _) = tokio::join!(pending, flusher);
        assert!(res.is_ok());
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
