use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::AuthSettings;
use crate::config::ResolverConfig;
use crate::gotrue::GoTrueClient;
use crate::rate_limit::{RateLimitStore, RateLimiter};

/// Shared state for auth route handlers.
pub(super) struct AuthState<S> {
    /// Template client; handlers work on `client.scoped()` copies.
    pub(super) client: Arc<GoTrueClient>,
    pub(super) limiter: Arc<RateLimiter<S>>,
    pub(super) resolver: ResolverConfig,
    pub(super) settings: AuthSettings,
}

// Manual Clone: avoid derive adding an `S: Clone` bound.
impl<S> Clone for AuthState<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            settings: self.settings.clone(),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<S: RateLimitStore> FromRef<AuthState<S>> for Key {
    fn from_ref(state: &AuthState<S>) -> Self {
        state.settings.cookie_key.clone()
    }
}
