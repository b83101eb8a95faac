use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use crate::config::ResolverConfig;
use crate::gotrue::{GoTrueClient, ProviderConfig};
use crate::rate_limit::RateLimitConfig;

/// Shared route settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) api_path: String,
    pub(crate) reset_page: String,
    pub(crate) recovery_ttl_minutes: i64,
    pub(crate) pkce_ttl_minutes: i64,
    pub(crate) dev_diagnostics: bool,
    pub(crate) rate_limit: RateLimitConfig,
    pub(crate) signup_rate_limit: RateLimitConfig,
}

impl AuthSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            secure_cookies: true,
            auth_path: "/auth".into(),
            api_path: "/api/auth".into(),
            reset_page: "/reset-password".into(),
            recovery_ttl_minutes: 10,
            pkce_ttl_minutes: 60,
            dev_diagnostics: false,
            rate_limit: RateLimitConfig::default(),
            signup_rate_limit: RateLimitConfig {
                limit: 3,
                ..RateLimitConfig::default()
            },
        }
    }
}

/// Configuration for [`auth_routes`](super::auth_routes).
///
/// Required field (`client`) is a constructor parameter.
///
/// Use [`from_env()`](AuthRoutesConfig::from_env) for convention-based setup,
/// or [`new()`](AuthRoutesConfig::new) with `with_*` methods for full control.
pub struct AuthRoutesConfig {
    pub(super) client: GoTrueClient,
    pub(super) resolver: ResolverConfig,
    pub(super) settings: AuthSettings,
}

impl AuthRoutesConfig {
    #[must_use]
    pub fn new(client: GoTrueClient) -> Self {
        Self {
            client,
            resolver: ResolverConfig::default(),
            settings: AuthSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `PAYROLL_AUTH_URL`: identity provider auth API root (e.g. `https://xyz.supabase.co/auth/v1`)
    /// - `PAYROLL_ANON_KEY`: public API key sent as the `apikey` header
    ///
    /// # Optional env vars
    /// - `PAYROLL_SITE_URL`: public site origin; recovery mails return to `{site}{auth_path}/callback`
    /// - `PAYROLL_AUTH_PATH`: browser-facing route prefix (default `/auth`)
    /// - `PAYROLL_API_PATH`: JSON API prefix (default `/api/auth`)
    /// - `DEV_AUTH`: `"1"` or `"true"` logs raw provider errors and disables secure cookies
    /// - `COOKIE_KEY`: cookie encryption key bytes (at least 64)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or URLs are invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// [`from_env`](Self::from_env) over an arbitrary variable lookup.
    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let auth_url: Url = var("PAYROLL_AUTH_URL")
            .ok_or_else(|| AuthError::Config("PAYROLL_AUTH_URL is required".into()))?
            .parse()
            .map_err(|e| AuthError::Config(format!("PAYROLL_AUTH_URL: {e}")))?;
        let anon_key = var("PAYROLL_ANON_KEY")
            .ok_or_else(|| AuthError::Config("PAYROLL_ANON_KEY is required".into()))?;

        let mut settings = AuthSettings::defaults();
        if let Some(path) = var("PAYROLL_AUTH_PATH") {
            settings.auth_path = path;
        }
        if let Some(path) = var("PAYROLL_API_PATH") {
            settings.api_path = path;
        }

        let mut provider = ProviderConfig::new(auth_url, anon_key);
        if let Some(site) = var("PAYROLL_SITE_URL") {
            let site = site.trim_end_matches('/');
            let callback: Url = format!("{site}{}/callback", settings.auth_path)
                .parse()
                .map_err(|e| AuthError::Config(format!("PAYROLL_SITE_URL: {e}")))?;
            provider = provider.with_redirect_url(callback);
        }

        let dev_auth = matches!(var("DEV_AUTH").as_deref(), Some("1" | "true"));

        if let Some(k) = var("COOKIE_KEY") {
            settings.cookie_key = Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?;
        }

        Ok(Self {
            client: GoTrueClient::new(provider),
            resolver: ResolverConfig::default(),
            settings,
        }
        .with_secure_cookies(!dev_auth)
        .with_dev_diagnostics(dev_auth))
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_api_path(mut self, path: impl Into<String>) -> Self {
        self.settings.api_path = path.into();
        self
    }

    /// Page the callback route forwards codes to (default `/reset-password`).
    #[must_use]
    pub fn with_reset_page(mut self, path: impl Into<String>) -> Self {
        self.settings.reset_page = path.into();
        self
    }

    /// How long a resolved recovery session stays usable for the reset form.
    #[must_use]
    pub fn with_recovery_ttl_minutes(mut self, minutes: i64) -> Self {
        self.settings.recovery_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.settings.rate_limit = config;
        self
    }

    /// Limit for account creation, kept stricter than [`with_rate_limit`](Self::with_rate_limit)
    /// (default 3 per 15 minutes).
    #[must_use]
    pub fn with_signup_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.settings.signup_rate_limit = config;
        self
    }

    #[must_use]
    pub fn with_resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver = config;
        self
    }

    #[must_use]
    pub fn with_dev_diagnostics(mut self, enabled: bool) -> Self {
        self.settings.dev_diagnostics = enabled;
        self.resolver = self.resolver.with_dev_diagnostics(enabled);
        self
    }
}
