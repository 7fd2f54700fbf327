//! Authentication collaborators.

use async_trait::async_trait;
use keyring::Entry;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Supplies bearer tokens to the dispatcher.
///
/// `refresh_token` is called once after a 401; returning `None` ends the
/// session, after which `redirect_to_login` is invoked.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;

    async fn refresh_token(&self) -> Option<String>;

    fn redirect_to_login(&self);
}

/// Anonymous access.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn access_token(&self) -> Option<String> {
        None
    }

    async fn refresh_token(&self) -> Option<String> {
        None
    }

    fn redirect_to_login(&self) {
        debug!("login redirect requested without an auth provider");
    }
}

/// Fixed token, with an optional replacement handed out on refresh.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    current: RwLock<Option<String>>,
    refreshed: RwLock<Option<String>>,
    login_redirects: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(Some(token.into())),
            ..Default::default()
        }
    }

    /// Token returned by the next refresh. Without one, refresh fails.
    pub fn with_refresh(self, token: impl Into<String>) -> Self {
        *self.refreshed.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
        self
    }

    pub fn login_redirects(&self) -> usize {
        self.login_redirects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn access_token(&self) -> Option<String> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn refresh_token(&self) -> Option<String> {
        let fresh = self
            .refreshed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(fresh.clone());
        Some(fresh)
    }

    fn redirect_to_login(&self) {
        self.login_redirects.fetch_add(1, Ordering::Relaxed);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Reads the session token from the OS keyring, falling back to
/// `<SERVICE>_TOKEN` in the environment.
///
/// The token is read once and cached; only `refresh_token` goes back to the
/// keyring, so a token rotated by another process is picked up after a 401.
/// Keyring access runs on the blocking pool.
#[derive(Debug)]
pub struct KeyringTokenProvider {
    service: String,
    account: String,
    cached: RwLock<Option<String>>,
}

impl KeyringTokenProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            cached: RwLock::new(None),
        }
    }

    /// Environment fallback, e.g. `marketplace-gateway` → `MARKETPLACE_GATEWAY_TOKEN`.
    pub fn env_var(&self) -> String {
        env_var_for(&self.service)
    }

    async fn lookup(&self) -> Option<String> {
        let service = self.service.clone();
        let account = self.account.clone();
        match tokio::task::spawn_blocking(move || read_token(&service, &account)).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "keyring lookup task failed");
                None
            }
        }
    }

    fn store(&self, token: Option<String>) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = token;
    }
}

fn env_var_for(service: &str) -> String {
    format!("{}_TOKEN", service.to_uppercase().replace(['-', '.', ' '], "_"))
}

fn read_token(service: &str, account: &str) -> Option<String> {
    // 1. Keyring
    if let Ok(entry) = Entry::new(service, account) {
        if let Ok(token) = entry.get_password() {
            return Some(token);
        }
    }
    // 2. Environment
    env::var(env_var_for(service)).ok().filter(|t| !t.trim().is_empty())
}

#[async_trait]
impl AuthProvider for KeyringTokenProvider {
    async fn access_token(&self) -> Option<String> {
        if let Some(token) = self.cached.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Some(token);
        }
        let token = self.lookup().await;
        self.store(token.clone());
        token
    }

    async fn refresh_token(&self) -> Option<String> {
        debug!(service = self.service.as_str(), "re-reading token");
        let token = self.lookup().await;
        self.store(token.clone());
        token
    }

    fn redirect_to_login(&self) {
        self.store(None);
        warn!(
            service = self.service.as_str(),
            "session expired; store a new token in the keyring or {}",
            self.env_var()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_refresh_rotates_once() {
        let auth = StaticTokenProvider::new("old").with_refresh("new");
        assert_eq!(auth.access_token().await.as_deref(), Some("old"));
        assert_eq!(auth.refresh_token().await.as_deref(), Some("new"));
        assert_eq!(auth.access_token().await.as_deref(), Some("new"));
        assert_eq!(auth.refresh_token().await, None);
    }

    #[tokio::test]
    async fn test_redirect_clears_session() {
        let auth = StaticTokenProvider::new("t");
        auth.redirect_to_login();
        assert_eq!(auth.login_redirects(), 1);
        assert_eq!(auth.access_token().await, None);
    }

    #[test]
    fn test_keyring_env_var_name() {
        let p = KeyringTokenProvider::new("marketplace-gateway", "default");
        assert_eq!(p.env_var(), "MARKETPLACE_GATEWAY_TOKEN");
    }

    #[tokio::test]
    async fn test_keyring_token_is_cached_until_refresh() {
        let p = KeyringTokenProvider::new("gateway-auth-cache-check", "default");
        let var = p.env_var();
        env::set_var(&var, "first");
        assert_eq!(p.access_token().await.as_deref(), Some("first"));

        env::set_var(&var, "second");
        assert_eq!(p.access_token().await.as_deref(), Some("first"));
        assert_eq!(p.refresh_token().await.as_deref(), Some("second"));
        assert_eq!(p.access_token().await.as_deref(), Some("second"));

        env::remove_var(&var);
        p.redirect_to_login();
        assert_eq!(p.access_token().await, None);
    }
}
