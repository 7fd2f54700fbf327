//! Standard outbound headers.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const REQUEST_ID: &str = "X-Request-ID";
pub const API_VERSION: &str = "X-API-Version";
pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "Content-Type";

const SUPPORTED_ENCODINGS: &str = "gzip, deflate, br";

/// `<unix-millis>-<random>`, unique per transport attempt.
pub fn request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", millis, &random[..9])
}

/// Header set for one attempt. Caller headers may override the defaults but
/// never the bearer token.
pub(crate) fn build(
    api_version: &str,
    token: Option<&str>,
    extra: Option<&BTreeMap<String, String>>,
    has_body: bool,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(REQUEST_ID.to_string(), request_id());
    headers.insert(API_VERSION.to_string(), api_version.to_string());
    headers.insert(ACCEPT_ENCODING.to_string(), SUPPORTED_ENCODINGS.to_string());
    if has_body {
        headers.insert(CONTENT_TYPE.to_string(), "application/json".to_string());
    }

    if let Some(extra) = extra {
        for (name, value) in extra {
            if name.eq_ignore_ascii_case(AUTHORIZATION) {
                continue;
            }
            // Replace a default regardless of the caller's casing.
            headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value.clone());
        }
    }

    if let Some(token) = token {
        headers.insert(AUTHORIZATION.to_string(), format!("Bearer {token}"));
    }
    headers
}
