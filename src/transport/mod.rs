//! 传输层模块：抽象的 HTTP 发送原语及其实现。
//!
//! # Transport Module
//!
//! The gateway never talks to the network directly; it hands a fully built
//! [`HttpRequest`] to a [`Transport`] and gets back a status and body, or a
//! [`TransportError`] when no response was received.
//!
//! | Implementation | Description |
//! |----------------|-------------|
//! | [`HttpTransport`] | reqwest-backed transport used in production |
//! | [`ScriptedTransport`] | In-memory scripted transport for tests and demos |

mod http;
mod scripted;

pub use http::HttpTransport;
pub use scripted::{RecordedRequest, ScriptedReply, ScriptedTransport};

use crate::types::HttpMethod;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

/// A request ready for the wire: absolute URL, final headers.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// URL path without scheme, host or query.
    pub fn path(&self) -> &str {
        let after_scheme = self
            .url
            .find("://")
            .map(|i| &self.url[i + 3..])
            .unwrap_or(&self.url);
        let path = after_scheme
            .find('/')
            .map(|i| &after_scheme[i..])
            .unwrap_or("/");
        path.split('?').next().unwrap_or(path)
    }
}

/// Raw backend answer. Header names are lowercase.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// "Send an HTTP request, get status and body or a network error."
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    fn name(&self) -> &'static str {
        "custom"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
