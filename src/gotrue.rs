use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::{RwLock, broadcast};
use url::Url;

use crate::error::Error;
use crate::pkce::PkcePair;
use crate::provider::{IdentityProvider, SessionEvents};
use crate::types::{AuthChangeEvent, AuthStateChange, OtpType, Session, User};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Identity provider connection settings.
///
/// ```rust,ignore
/// let config = ProviderConfig::new("https://xyz.supabase.co/auth/v1".parse()?, anon_key)
///     .with_redirect_url("https://payroll.example.com/auth/callback".parse()?);
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub struct ProviderConfig {
    pub(crate) base_url: Url,
    pub(crate) anon_key: String,
    pub(crate) redirect_url: Option<Url>,
}

impl ProviderConfig {
    /// `base_url` is the auth API root (the path ending in `/auth/v1`).
    #[must_use]
    pub fn new(base_url: Url, anon_key: impl Into<String>) -> Self {
        Self {
            base_url,
            anon_key: anon_key.into(),
            redirect_url: None,
        }
    }

    /// Where recovery mails send the user back to.
    #[must_use]
    pub fn with_redirect_url(mut self, url: Url) -> Self {
        self.redirect_url = Some(url);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn redirect_url(&self) -> Option<&Url> {
        self.redirect_url.as_ref()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("anon_key", &"***")
            .field("redirect_url", &self.redirect_url)
            .finish()
    }
}

struct Shared {
    config: ProviderConfig,
    http: reqwest::Client,
}

/// HTTP client for the identity provider's auth API.
///
/// Holds the current session and broadcasts changes to it, which is what
/// [`SessionListener`](crate::SessionListener) subscribes to.
pub struct GoTrueClient {
    shared: Arc<Shared>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl GoTrueClient {
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self::with_shared(Arc::new(Shared {
            config,
            http: reqwest::Client::new(),
        }))
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(self, http: reqwest::Client) -> Self {
        Self::with_shared(Arc::new(Shared {
            config: self.shared.config.clone(),
            http,
        }))
    }

    /// A client with the same configuration and connection pool but its own
    /// session state. Use one per server request.
    #[must_use]
    pub fn scoped(&self) -> Self {
        Self::with_shared(self.shared.clone())
    }

    fn with_shared(shared: Arc<Shared>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared,
            session: RwLock::new(None),
            events,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.shared.config
    }

    /// Replaces the held session (e.g. restored from a cookie) and emits `SignedIn`.
    pub async fn set_session(&self, session: Session) {
        self.store(session, AuthChangeEvent::SignedIn).await;
    }

    /// Password sign-in.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] on network failure, [`Error::Provider`] on rejection.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error> {
        let response = self
            .post("token?grant_type=password")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let session = Self::session_from(response, "password sign-in").await?;
        self.store(session.clone(), AuthChangeEvent::SignedIn).await;
        Ok(session)
    }

    /// Asks the provider to mail a recovery link.
    ///
    /// Returns the PKCE pair whose challenge was sent; keep the verifier for
    /// the code exchange when the user comes back.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] on network failure, [`Error::Provider`] on rejection.
    pub async fn reset_password_for_email(&self, email: &str) -> Result<PkcePair, Error> {
        let pkce = PkcePair::generate();
        let mut url = self.endpoint("recover");
        if let Some(redirect) = &self.shared.config.redirect_url {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&json!({
                "email": email,
                "code_challenge": pkce.challenge,
                "code_challenge_method": "s256",
            }))
            .send()
            .await?;
        Self::ensure_success(response, "password recovery request").await?;
        Ok(pkce)
    }

    /// Creates an account. `name` is stored as `full_name` and `name` in
    /// the user metadata.
    ///
    /// When the provider confirms immediately and answers with a session,
    /// that session is held and `SignedIn` is emitted.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] on network failure, [`Error::Provider`] on rejection.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, Error> {
        let mut url = self.endpoint("signup");
        if let Some(redirect) = &self.shared.config.redirect_url {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }
        let data = name.map_or_else(|| json!({}), |n| json!({ "full_name": n, "name": n }));
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&json!({ "email": email, "password": password, "data": data }))
            .send()
            .await?;
        let response = Self::ensure_success(response, "sign up").await?;

        match response.json::<SignUpResponse>().await? {
            SignUpResponse::Session(session) => {
                let user = session
                    .user
                    .clone()
                    .ok_or_else(|| Error::provider("sign up", "no user in response"))?;
                self.store(session, AuthChangeEvent::SignedIn).await;
                Ok(user)
            }
            SignUpResponse::User(user) => Ok(user),
        }
    }

    /// Fetches the held session's user from the provider.
    ///
    /// # Errors
    ///
    /// [`Error::Provider`] if no session is held or the token is rejected.
    pub async fn get_user(&self) -> Result<User, Error> {
        let access_token = self.access_token("get user").await?;
        let response = self
            .request(reqwest::Method::GET, self.endpoint("user"))
            .bearer_auth(&access_token)
            .send()
            .await?;
        let response = Self::ensure_success(response, "get user").await?;
        response.json::<User>().await.map_err(Into::into)
    }

    /// Sets a new password for the held session's user.
    ///
    /// # Errors
    ///
    /// [`Error::Provider`] if no session is held or the provider rejects the update.
    pub async fn update_password(&self, password: &str) -> Result<User, Error> {
        let access_token = self.access_token("password update").await?;

        let response = self
            .request(reqwest::Method::PUT, self.endpoint("user"))
            .bearer_auth(&access_token)
            .json(&json!({ "password": password }))
            .send()
            .await?;
        let response = Self::ensure_success(response, "password update").await?;
        let user = response.json::<User>().await?;

        if let Some(session) = self.session.write().await.as_mut() {
            session.user = Some(user.clone());
        }
        let _ = self.events.send(AuthStateChange::new(
            AuthChangeEvent::UserUpdated,
            self.session.read().await.clone(),
        ));
        Ok(user)
    }

    async fn access_token(&self, operation: &'static str) -> Result<String, Error> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or_else(|| Error::provider(operation, "no active session"))
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.shared.config.base_url.clone();
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let joined = format!("{}/{path}", url.path().trim_end_matches('/'));
        url.set_path(&joined);
        url.set_query((!query.is_empty()).then_some(query));
        url
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.shared
            .http
            .request(method, url)
            .header("apikey", &self.shared.config.anon_key)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::POST, self.endpoint(path))
    }

    async fn store(&self, session: Session, event: AuthChangeEvent) {
        *self.session.write().await = Some(session.clone());
        let _ = self.events.send(AuthStateChange::new(event, Some(session)));
    }

    async fn session_from(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<Session, Error> {
        let response = Self::ensure_success(response, operation).await?;
        response.json::<Session>().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Provider {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

/// `/signup` answers with a session when no confirmation mail is needed,
/// otherwise with the bare user.
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(Session),
    User(User),
}

impl IdentityProvider for GoTrueClient {
    async fn get_session(&self) -> Result<Option<Session>, Error> {
        Ok(self.session.read().await.clone())
    }

    fn subscribe(&self) -> SessionEvents {
        SessionEvents::new(self.events.subscribe())
    }

    async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, Error> {
        let response = self
            .post("verify")
            .json(&json!({ "token_hash": token_hash, "type": otp_type }))
            .send()
            .await?;
        let session = Self::session_from(response, "verify otp").await?;
        let event = match otp_type {
            OtpType::Recovery => AuthChangeEvent::PasswordRecovery,
            _ => AuthChangeEvent::SignedIn,
        };
        self.store(session.clone(), event).await;
        Ok(session)
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, Error> {
        let mut body = json!({ "auth_code": code });
        if let Some(verifier) = code_verifier {
            body["code_verifier"] = json!(verifier);
        }
        let response = self
            .post("token?grant_type=pkce")
            .json(&body)
            .send()
            .await?;
        let session = Self::session_from(response, "code exchange").await?;
        self.store(session.clone(), AuthChangeEvent::SignedIn).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), Error> {
        let session = self.session.write().await.take();
        let _ = self
            .events
            .send(AuthStateChange::new(AuthChangeEvent::SignedOut, None));

        let Some(session) = session else {
            return Ok(());
        };
        let response = self
            .post("logout")
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        Self::ensure_success(response, "sign out").await?;
        Ok(())
    }
}
