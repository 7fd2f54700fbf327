use crate::client::dispatch::Dispatcher;
use crate::types::{ApiResponse, RequestDescriptor};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub requests_per_second: f64,
    pub min_spacing_ms: u64,
    /// Items accepted but not yet picked up by the drain task.
    pub pending: usize,
    pub dispatched: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Dispatch rate ceiling. `0` disables spacing.
    pub requests_per_second: f64,
}

impl ThrottleConfig {
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self {
            requests_per_second: rps,
        })
    }

    /// Minimum gap between two dispatch starts.
    pub fn min_spacing(&self) -> Duration {
        if self.requests_per_second <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(1.0 / self.requests_per_second).unwrap_or(Duration::MAX)
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
        }
    }
}

/// A descriptor waiting for its turn. Lives only inside the queue channel.
struct QueuedRequest {
    descriptor: RequestDescriptor,
    enqueued_at: Instant,
    responder: oneshot::Sender<Result<ApiResponse>>,
    cancel: Option<CancellationToken>,
}

/// FIFO request throttler.
///
/// Submissions go into an unbounded channel owned by a single drain task,
/// which dispatches one item at a time and completes it before dequeuing the
/// next. Items are therefore dispatched strictly in arrival order, spaced at
/// least `1 / requests_per_second` apart.
pub struct RequestQueue {
    cfg: ThrottleConfig,
    dispatcher: Arc<Dispatcher>,
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedRequest>>>,
    pending: Arc<AtomicUsize>,
    dispatched: Arc<AtomicU64>,
}

impl RequestQueue {
    pub fn new(cfg: ThrottleConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            cfg,
            dispatcher,
            sender: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
            dispatched: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sender of the running drain task, starting one if none is running.
    fn sender(&self) -> mpsc::UnboundedSender<QueuedRequest> {
        let mut guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(
            rx,
            Arc::clone(&self.dispatcher),
            self.cfg.min_spacing(),
            Arc::clone(&self.pending),
            Arc::clone(&self.dispatched),
        ));
        *guard = Some(tx.clone());
        tx
    }

    pub async fn enqueue(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        self.enqueue_cancellable(descriptor, None).await
    }

    /// Enqueue with a cooperative cancellation signal, honoured until the
    /// item is handed to the transport.
    pub async fn enqueue_cancellable(
        &self,
        descriptor: RequestDescriptor,
        cancel: Option<CancellationToken>,
    ) -> Result<ApiResponse> {
        let (responder, completion) = oneshot::channel();
        let item = QueuedRequest {
            descriptor,
            enqueued_at: Instant::now(),
            responder,
            cancel,
        };

        self.pending.fetch_add(1, Ordering::Relaxed);
        if self.sender().send(item).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::runtime_with_context(
                "request queue closed",
                ErrorContext::new().with_source("request_queue"),
            ));
        }

        completion.await.map_err(|_| {
            Error::runtime_with_context(
                "request queue dropped the request",
                ErrorContext::new().with_source("request_queue"),
            )
        })?
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            requests_per_second: self.cfg.requests_per_second,
            min_spacing_ms: u64::try_from(self.cfg.min_spacing().as_millis()).unwrap_or(u64::MAX),
            pending: self.len(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<QueuedRequest>,
    dispatcher: Arc<Dispatcher>,
    spacing: Duration,
    pending: Arc<AtomicUsize>,
    dispatched: Arc<AtomicU64>,
) {
    let mut last_dispatch: Option<Instant> = None;

    while let Some(item) = rx.recv().await {
        pending.fetch_sub(1, Ordering::Relaxed);

        if item.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            let _ = item.responder.send(Err(Error::Cancelled));
            continue;
        }

        if let Some(last) = last_dispatch {
            // `sleep` clamps a saturated spacing instead of overflowing the deadline.
            let wait = spacing.saturating_sub(last.elapsed());
            if !wait.is_zero() {
                match &item.cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = token.cancelled() => {
                                let _ = item.responder.send(Err(Error::Cancelled));
                                continue;
                            }
                        }
                    }
                    None => tokio::time::sleep(wait).await,
                }
            }
        }

        last_dispatch = Some(Instant::now());
        debug!(
            method = item.descriptor.method.as_str(),
            endpoint = item.descriptor.endpoint(),
            queued_ms = item.enqueued_at.elapsed().as_millis() as u64,
            "dispatching queued request"
        );

        let result = dispatcher.dispatch(&item.descriptor).await;
        dispatched.fetch_add(1, Ordering::Relaxed);
        // The caller may have stopped waiting; the call still ran.
        let _ = item.responder.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::auth::NoAuth;
    use crate::telemetry::MetricsRecorder;
    use crate::transport::{ScriptedReply, ScriptedTransport};
    use serde_json::json;

    fn queue_with(transport: Arc<ScriptedTransport>, rps: f64) -> RequestQueue {
        let dispatcher = Arc::new(Dispatcher::new(
            "http://backend/api/jobs",
            "1.0",
            transport,
            Arc::new(NoAuth),
            Arc::new(MetricsRecorder::default()),
        ));
        RequestQueue::new(ThrottleConfig::from_rps(rps).unwrap(), dispatcher)
    }

    #[test]
    fn test_throttle_config() {
        assert_eq!(ThrottleConfig::default().min_spacing(), Duration::from_millis(100));
        assert_eq!(ThrottleConfig::from_rps(0.0).unwrap().min_spacing(), Duration::ZERO);
        assert!(ThrottleConfig::from_rps(-1.0).is_none());
        assert!(ThrottleConfig::from_rps(f64::NAN).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_order_and_spacing() {
        let transport = Arc::new(
            ScriptedTransport::new().with_handler(|_| ScriptedReply::json(200, json!({}))),
        );
        let queue = queue_with(Arc::clone(&transport), 4.0);

        let calls = (0..5).map(|i| queue.enqueue(RequestDescriptor::get(format!("/jobs/{i}"))));
        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let recorded = transport.requests();
        let urls: Vec<_> = recorded.iter().map(|r| r.request.url.clone()).collect();
        let expected: Vec<_> = (0..5)
            .map(|i| format!("http://backend/api/jobs/jobs/{i}"))
            .collect();
        assert_eq!(urls, expected);

        for pair in recorded.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(250));
        }
        assert_eq!(queue.snapshot().dispatched, 5);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_stop_the_queue() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .push(ScriptedReply::json(200, json!({"n": 1})))
                .push(ScriptedReply::network_error("connection reset"))
                .push(ScriptedReply::json(200, json!({"n": 3}))),
        );
        let queue = queue_with(Arc::clone(&transport), 0.0);

        let (a, b, c) = tokio::join!(
            queue.enqueue(RequestDescriptor::get("/a")),
            queue.enqueue(RequestDescriptor::get("/b")),
            queue.enqueue(RequestDescriptor::get("/c")),
        );
        assert_eq!(a.unwrap().data, json!({"n": 1}));
        assert!(matches!(b.unwrap_err(), Error::Transport(_)));
        assert_eq!(c.unwrap().data, json!({"n": 3}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_dispatch_never_reaches_transport() {
        let transport = Arc::new(
            ScriptedTransport::new().with_handler(|_| ScriptedReply::json(200, json!({}))),
        );
        let queue = queue_with(Arc::clone(&transport), 1.0);
        let token = CancellationToken::new();

        let first = queue.enqueue(RequestDescriptor::get("/first"));
        let second = async {
            let fut = queue.enqueue_cancellable(RequestDescriptor::get("/second"), Some(token.clone()));
            tokio::pin!(fut);
            // Let both items reach the drain task, then cancel during the spacing wait.
            tokio::select! {
                res = &mut fut => res,
                _ = tokio::time::sleep(Duration::from_millis(10)) => {
                    token.cancel();
                    fut.await
                }
            }
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok());
        assert!(matches!(second.unwrap_err(), Error::Cancelled));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_tiny_rate_saturates_spacing() {
        let cfg = ThrottleConfig::from_rps(1e-20).unwrap();
        assert_eq!(cfg.min_spacing(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_spacing_waits_without_overflow() {
        let transport = Arc::new(
            ScriptedTransport::new().with_handler(|_| ScriptedReply::json(200, json!({}))),
        );
        let queue = queue_with(Arc::clone(&transport), 1e-20);
        queue.enqueue(RequestDescriptor::get("/first")).await.unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            canceller.cancel();
        });
        let second = queue
            .enqueue_cancellable(RequestDescriptor::get("/second"), Some(token))
            .await;
        assert!(matches!(second.unwrap_err(), Error::Cancelled));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(queue.snapshot().min_spacing_ms, u64::MAX);
    }
}
