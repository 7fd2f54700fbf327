//! Cache key generation.

use crate::types::RequestDescriptor;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Deterministic signature of a request's content.
///
/// Shared by the response cache and the deduplicator: two descriptors map to
/// the same key exactly when method, url, params and body are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    /// Request URL, kept for pattern invalidation and logging.
    pub url: String,
}

impl CacheKey {
    pub fn for_request(descriptor: &RequestDescriptor) -> Self {
        CacheKeyGenerator::default().generate(descriptor)
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Namespace keys, e.g. per signed-in account.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(&self, descriptor: &RequestDescriptor) -> CacheKey {
        // BTreeMap (and serde_json's default map) keep the canonical form ordered.
        let mut parts: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        parts.insert("method", descriptor.method.as_str().into());
        parts.insert("url", descriptor.url.clone().into());
        if let Some(params) = &descriptor.params {
            parts.insert("params", serde_json::to_value(params).unwrap_or_default());
        }
        if let Some(body) = &descriptor.body {
            parts.insert("body", body.clone());
        }
        if let Some(ref s) = self.salt {
            parts.insert("salt", s.clone().into());
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey {
            hash,
            url: descriptor.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ignores_id_and_headers() {
        let a = RequestDescriptor::get("/jobs")
            .with_param("x", 1)
            .with_id("a")
            .with_header("X-Trace", "1");
        let b = RequestDescriptor::get("/jobs").with_param("x", 1).with_id("b");
        assert_eq!(CacheKey::for_request(&a), CacheKey::for_request(&b));
    }

    #[test]
    fn test_param_insertion_order_does_not_matter() {
        let a = RequestDescriptor::get("/jobs").with_param("a", 1).with_param("b", 2);
        let b = RequestDescriptor::get("/jobs").with_param("b", 2).with_param("a", 1);
        assert_eq!(CacheKey::for_request(&a), CacheKey::for_request(&b));
    }

    #[test]
    fn test_content_changes_key() {
        let base = CacheKey::for_request(&RequestDescriptor::get("/jobs").with_param("x", 1));
        let other_param = CacheKey::for_request(&RequestDescriptor::get("/jobs").with_param("x", 2));
        let other_method = CacheKey::for_request(
            &RequestDescriptor::post("/jobs", json!({})).with_param("x", 1),
        );
        assert_ne!(base, other_param);
        assert_ne!(base, other_method);
    }

    #[test]
    fn test_salt_namespaces_keys() {
        let d = RequestDescriptor::get("/me");
        let alice = CacheKeyGenerator::new().with_salt("alice").generate(&d);
        let bob = CacheKeyGenerator::new().with_salt("bob").generate(&d);
        assert_ne!(alice, bob);
        assert_eq!(alice.hash.len(), 64);
    }
}
