//! Batch wire format.
//!
//! ```text
//! POST /batch
//! X-Batch-Request: true
//! { "requests": [ { "id", "method", "url", "params"?, "data"?, "headers"? } ] }
//!
//! { "responses": [ { "id", "status", "data"?, "error"?: { "message", "code"? } } ],
//!   "errors"?: [ ... ] }
//! ```

use crate::types::{ApiResponse, HttpMethod, RequestDescriptor};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const BATCH_HEADER: &str = "X-Batch-Request";
pub(crate) const NO_RESPONSE_MESSAGE: &str = "No response received";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestEnvelope {
    pub requests: Vec<WireRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl From<&RequestDescriptor> for WireRequest {
    fn from(d: &RequestDescriptor) -> Self {
        Self {
            id: d.id.clone(),
            method: d.method,
            url: d.url.clone(),
            params: d.params.clone(),
            data: d.body.clone(),
            headers: d.headers.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchResponseEnvelope {
    #[serde(default)]
    pub responses: Vec<WireResponse>,
    /// Envelope-level errors; logged, never mapped to members.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl WireResponse {
    /// 2xx becomes the member's response; anything else a per-item error.
    pub fn into_result(self) -> Result<ApiResponse> {
        if (200..300).contains(&self.status) {
            return Ok(ApiResponse::new(self.status, self.data));
        }
        let (message, code) = match self.error {
            Some(e) => (e.message, e.code),
            None => (format!("Batch item failed with status {}", self.status), None),
        };
        Err(Error::BatchItem {
            id: self.id,
            status: self.status,
            message,
            code,
        })
    }
}

pub(crate) fn unmatched(id: &str) -> Error {
    Error::BatchItem {
        id: id.to_string(),
        status: 500,
        message: NO_RESPONSE_MESSAGE.to_string(),
        code: None,
    }
}
