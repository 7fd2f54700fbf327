use super::{HttpRequest, HttpResponse, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One canned answer.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Response(HttpResponse),
    NetworkError(String),
}

impl ScriptedReply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        ScriptedReply::Response(HttpResponse {
            status,
            headers,
            body: Bytes::from(body.to_string()),
        })
    }

    pub fn empty(status: u16) -> Self {
        ScriptedReply::Response(HttpResponse {
            status,
            headers: BTreeMap::new(),
            body: Bytes::new(),
        })
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        ScriptedReply::NetworkError(message.into())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let ScriptedReply::Response(resp) = &mut self {
            resp.headers
                .insert(name.to_ascii_lowercase(), value.to_string());
        }
        self
    }
}

/// A request as it reached the transport, with the instant it arrived.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    pub at: Instant,
}

type Handler = Box<dyn Fn(&HttpRequest) -> ScriptedReply + Send + Sync>;

/// In-memory transport that replays scripted replies in order, or answers
/// through a handler once the script is exhausted.
///
/// Uses the tokio clock so it cooperates with paused-time tests.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedReply>>,
    handler: Option<Handler>,
    latency: Duration,
    log: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            handler: None,
            latency: Duration::ZERO,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply; scripted replies are consumed before the handler.
    pub fn push(self, reply: ScriptedReply) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Simulated time each call spends on the wire.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let reply = {
            let next = self
                .script
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match (next, &self.handler) {
                (Some(reply), _) => reply,
                (None, Some(handler)) => handler(&request),
                (None, None) => ScriptedReply::network_error("no scripted reply left"),
            }
        };

        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                request,
                at: Instant::now(),
            });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match reply {
            ScriptedReply::Response(resp) => Ok(resp),
            ScriptedReply::NetworkError(message) => Err(TransportError::Other(message)),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
