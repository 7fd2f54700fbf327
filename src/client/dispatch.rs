//! 请求分发：构建线上请求、附加认证头、处理 401 刷新并记录指标。
//!
//! Wire dispatch for one descriptor.
//!
//! This is the only place that turns a [`RequestDescriptor`] into an
//! [`HttpRequest`], so auth and the standard headers are attached exactly
//! once per attempt whichever path (plain, batch, fallback) the call took.

use super::auth::AuthProvider;
use super::headers;
use crate::telemetry::{MetricSample, MetricsRecorder};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{ApiResponse, RequestDescriptor};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct Dispatcher {
    base_url: String,
    api_version: String,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    metrics: Arc<MetricsRecorder>,
}

impl Dispatcher {
    pub fn new(
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_version: api_version.into(),
            transport,
            auth,
            metrics,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Absolute URLs pass through; anything else is joined to the base URL.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    /// Send `descriptor` once, with a single refresh-and-resend on 401.
    pub async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse> {
        let token = self.auth.access_token().await;
        let response = self.attempt(descriptor, token.as_deref()).await?;
        if response.status != 401 {
            return into_result(response);
        }

        debug!(endpoint = descriptor.endpoint(), "401 received, refreshing token");
        match self.auth.refresh_token().await {
            Some(fresh) => {
                let retried = self.attempt(descriptor, Some(&fresh)).await?;
                into_result(retried)
            }
            None => {
                warn!(endpoint = descriptor.endpoint(), "token refresh failed, redirecting to login");
                self.auth.redirect_to_login();
                Err(Error::Authentication {
                    message: "session expired, please sign in again".to_string(),
                })
            }
        }
    }

    fn build_request(&self, descriptor: &RequestDescriptor, token: Option<&str>) -> HttpRequest {
        HttpRequest {
            method: descriptor.method,
            url: self.resolve_url(&descriptor.url),
            query: query_pairs(descriptor),
            headers: headers::build(
                &self.api_version,
                token,
                descriptor.headers.as_ref(),
                descriptor.body.is_some(),
            ),
            body: descriptor.body.clone(),
        }
    }

    /// One transport call, recorded as exactly one metric sample.
    async fn attempt(&self, descriptor: &RequestDescriptor, token: Option<&str>) -> Result<HttpResponse> {
        let request = self.build_request(descriptor, token);
        let request_size = request
            .body
            .as_ref()
            .and_then(|b| serde_json::to_vec(b).ok())
            .map(|b| b.len());
        let endpoint = descriptor.endpoint().to_string();
        let method = descriptor.method.as_str();

        let start = Instant::now();
        let outcome = self.transport.send(request).await;
        let duration = start.elapsed();

        match outcome {
            Ok(response) => {
                debug!(
                    method,
                    endpoint = endpoint.as_str(),
                    status = response.status,
                    duration_ms = duration.as_millis() as u64,
                    "request completed"
                );
                self.metrics.record(
                    MetricSample::new(endpoint, method, response.status, duration)
                        .with_sizes(request_size, Some(response.body.len())),
                );
                Ok(response)
            }
            Err(err) => {
                warn!(
                    method,
                    endpoint = endpoint.as_str(),
                    error = %err,
                    "request failed without a response"
                );
                self.metrics.record(
                    MetricSample::new(endpoint, method, 0, duration)
                        .with_error(err.to_string())
                        .with_sizes(request_size, None),
                );
                Err(Error::from(err))
            }
        }
    }
}

fn query_pairs(descriptor: &RequestDescriptor) -> Vec<(String, String)> {
    let Some(params) = &descriptor.params else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(params.len());
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    out.push((key.clone(), scalar(item)));
                }
            }
            other => out.push((key.clone(), scalar(other))),
        }
    }
    out
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Empty body → `null`; non-JSON text → JSON string.
fn parse_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn error_message(data: &Value, status: u16) -> String {
    let candidates = [
        data.pointer("/error/message"),
        data.get("error"),
        data.get("message"),
        data.get("detail"),
        Some(data),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().filter(|s| !s.trim().is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

/// `Retry-After: <seconds>`; the HTTP-date form is ignored.
fn retry_after_ms(response: &HttpResponse) -> Option<u64> {
    let raw = response.header("retry-after")?.trim();
    let secs: f64 = raw.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0).round() as u64)
}

fn into_result(response: HttpResponse) -> Result<ApiResponse> {
    let data = parse_body(&response.body);
    if response.status < 400 {
        return Ok(ApiResponse {
            status: response.status,
            headers: response.headers,
            data,
        });
    }

    let retry_after_ms = if response.status == 429 {
        retry_after_ms(&response)
    } else {
        None
    };
    Err(Error::Remote {
        status: response.status,
        message: error_message(&data, response.status),
        retry_after_ms,
        body: (!data.is_null()).then_some(data),
    })
}
