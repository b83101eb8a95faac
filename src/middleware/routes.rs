use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, header::USER_AGENT};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::config::{AuthRoutesConfig, AuthSettings};
use super::cookies;
use super::error::AuthError;
use super::extractor::{RecoverySession, SessionToken};
use super::state::AuthState;
use super::types::{
    ForgotPasswordRequest, LoginRequest, ResetPasswordRequest, ResolveRequest, ResolveResponse,
    SignupRequest, UserResponse,
};
use crate::error::Error;
use crate::password::{
    MIN_PASSWORD_LEN, is_valid_email, normalize_email, validate_new_password, validate_password,
};
use crate::provider::{IdentityProvider, bounded};
use crate::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitStore, RateLimiter};
use crate::resolver::SessionResolver;
use crate::state::SessionState;
use crate::types::{OtpType, Session};

const RECOVERY_SENT: &str =
    "If an account exists with that email, a password reset link has been sent.";
const INVALID_CREDENTIALS: &str = "Invalid email or password";
const LOGIN_MIN_PASSWORD_LEN: usize = 6;
const NAME_MAX_LEN: usize = 100;

/// Create the password-recovery router.
///
/// `rate_limit_store` backs the per-IP limits on login, signup and recovery
/// mail requests; use [`MemoryRateLimitStore`](crate::MemoryRateLimitStore) for a
/// single instance.
pub fn auth_routes<S: RateLimitStore>(config: AuthRoutesConfig, rate_limit_store: S) -> Router {
    let AuthRoutesConfig {
        client,
        resolver,
        settings,
    } = config;
    let auth_path = settings.auth_path.clone();
    let api_path = settings.api_path.clone();

    let state = AuthState {
        client: Arc::new(client),
        limiter: Arc::new(RateLimiter::new(rate_limit_store, settings.rate_limit)),
        resolver,
        settings,
    };

    Router::new()
        .route(&format!("{auth_path}/callback"), get(callback::<S>))
        .route(
            &format!("{api_path}/forgot-password"),
            post(forgot_password::<S>),
        )
        .route(&format!("{api_path}/login"), post(login::<S>))
        .route(&format!("{api_path}/logout"), post(logout::<S>))
        .route(&format!("{api_path}/me"), get(me::<S>))
        .route(&format!("{api_path}/signup"), post(signup::<S>))
        .route(&format!("{api_path}/resolve"), post(resolve::<S>))
        .route(
            &format!("{api_path}/reset-password"),
            post(reset_password::<S>),
        )
        .with_state(state)
}

// ── Callback ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    next: Option<String>,
}

async fn callback<S: RateLimitStore>(
    State(state): State<AuthState<S>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let reset_page = &state.settings.reset_page;
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return Redirect::to(reset_page);
    };

    let next = params
        .next
        .filter(|n| is_local_path(n))
        .unwrap_or_else(|| reset_page.clone());
    let separator = if next.contains('?') { '&' } else { '?' };
    let encoded = urlencoding::encode(&code);
    Redirect::to(&format!("{next}{separator}code={encoded}&type=recovery"))
}

// ── Forgot password ────────────────────────────────────────────────

async fn forgot_password<S: RateLimitStore>(
    State(state): State<AuthState<S>>,
    jar: PrivateCookieJar,
    headers: HeaderMap,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<(PrivateCookieJar, Json<Value>), AuthError> {
    let key = format!("forgot-password:{}", client_ip(&headers));
    let limit = state.settings.rate_limit;
    enforce_limit(&state, &key, limit, "Too many requests. Please try again later.").await?;

    if body.email.is_empty() {
        return Err(AuthError::BadRequest("Email is required".into()));
    }
    if !is_valid_email(&body.email) {
        return Err(AuthError::BadRequest("Invalid email format".into()));
    }
    let email = normalize_email(&body.email);

    let client = state.client.scoped();
    let requested = bounded(
        "password recovery request",
        state.resolver.provider_timeout(),
        client.reset_password_for_email(&email),
    )
    .await;

    // Same answer whether or not the account exists.
    let jar = match requested {
        Ok(pkce) => jar.add(cookies::pkce_cookie(
            &pkce.verifier,
            state.settings.secure_cookies,
            &state.settings.api_path,
            state.settings.pkce_ttl_minutes,
        )),
        Err(e) => {
            log_provider_error(&state.settings, "Password recovery request failed", &e);
            jar
        }
    };

    Ok((jar, Json(json!({ "message": RECOVERY_SENT }))))
}

// ── Login ──────────────────────────────────────────────────────────

async fn login<S: RateLimitStore>(
    State(state): State<AuthState<S>>,
    jar: PrivateCookieJar,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<(PrivateCookieJar, Json<UserResponse>), AuthError> {
    let key = format!("login:{}", client_ip(&headers));
    let limit = state.settings.rate_limit;
    enforce_limit(&state, &key, limit, "Too many login attempts. Please try again later.")
        .await?;

    if body.email.is_empty() || body.password.is_empty() {
        return Err(AuthError::BadRequest(
            "Email and password are required".into(),
        ));
    }
    if !is_valid_email(&body.email) {
        return Err(AuthError::BadRequest("Invalid email format".into()));
    }
    if body.password.chars().count() < LOGIN_MIN_PASSWORD_LEN {
        return Err(AuthError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    let email = normalize_email(&body.email);
    let client = state.client.scoped();
    let session = bounded(
        "password sign-in",
        state.resolver.provider_timeout(),
        client.sign_in_with_password(&email, &body.password),
    )
    .await
    .map_err(|e| {
        log_provider_error(&state.settings, "Password sign-in failed", &e);
        AuthError::Unauthorized(INVALID_CREDENTIALS.into())
    })?;

    state.limiter.clear(&key).await?;

    let user = session
        .user
        .clone()
        .ok_or_else(|| AuthError::Internal("sign-in response carried no user".into()))?;
    tracing::info!(
        user_id = %user.id,
        user_agent = ?extract_user_agent(&headers),
        "Password login successful"
    );

    let jar = jar.add(cookies::session_cookie(
        &session.access_token,
        state.settings.secure_cookies,
        session.expires_in,
    ));
    Ok((jar, Json(user.into())))
}

// ── Signup ─────────────────────────────────────────────────────────

async fn signup<S: RateLimitStore>(
    State(state): State<AuthState<S>>,
    headers: HeaderMap,
    Json(body): Json<SignupRequest>,
) -> Result<Json<UserResponse>, AuthError> {
    let key = format!("signup:{}", client_ip(&headers));
    let limit = state.settings.signup_rate_limit;
    enforce_limit(&state, &key, limit, "Too many signup attempts. Please try again later.")
        .await?;

    if body.email.is_empty() || body.password.is_empty() {
        return Err(AuthError::BadRequest(
            "Email and password are required".into(),
        ));
    }
    if !is_valid_email(&body.email) {
        return Err(AuthError::BadRequest("Invalid email format".into()));
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let name = body
        .name
        .as_deref()
        .map(|n| n.trim().chars().take(NAME_MAX_LEN).collect::<String>())
        .filter(|n| !n.is_empty());

    let email = normalize_email(&body.email);
    let client = state.client.scoped();
    let user = bounded(
        "sign up",
        state.resolver.provider_timeout(),
        client.sign_up(&email, &body.password, name.as_deref()),
    )
    .await
    .map_err(|e| {
        log_provider_error(&state.settings, "Signup failed", &e);
        AuthError::BadRequest("Unable to create account. Please try again.".into())
    })?;

    state.limiter.clear(&key).await?;
    tracing::info!(
        user_id = %user.id,
        user_agent = ?extract_user_agent(&headers),
        "Account created"
    );

    Ok(Json(user.into()))
}

// ── Logout ─────────────────────────────────────────────────────────

/// Always succeeds; a provider failure only leaves the token to expire.
async fn logout<S: RateLimitStore>(
    State(state): State<AuthState<S>>,
    jar: PrivateCookieJar,
    token: Option<SessionToken>,
) -> (PrivateCookieJar, Json<Value>) {
    if let Some(SessionToken(token)) = token {
        let client = state.client.scoped();
        client.set_session(Session::new(token)).await;
        let timeout = state.resolver.provider_timeout();
        if let Err(e) = bounded("sign out", timeout, client.sign_out()).await {
            log_provider_error(&state.settings, "Sign-out failed", &e);
        }
    }
    (
        jar.remove(cookies::clear_session_cookie()),
        Json(json!({ "success": true })),
    )
}

// ── Me ─────────────────────────────────────────────────────────────

async fn me<S: RateLimitStore>(
    State(state): State<AuthState<S>>,
    SessionToken(token): SessionToken,
) -> Result<Json<UserResponse>, AuthError> {
    let client = state.client.scoped();
    client.set_session(Session::new(token)).await;
    let user = bounded("get user", state.resolver.provider_timeout(), client.get_user())
        .await
        .map_err(|e| {
            log_provider_error(&state.settings, "Session lookup failed", &e);
            AuthError::Unauthorized("Not authenticated".into())
        })?;
    Ok(Json(user.into()))
}

// ── Resolve ────────────────────────────────────────────────────────

async fn resolve<S: RateLimitStore>(
    State(state): State<AuthState<S>>,
    jar: PrivateCookieJar,
    Json(body): Json<ResolveRequest>,
) -> Result<(PrivateCookieJar, Json<ResolveResponse>), AuthError> {
    let url: Url = body
        .url
        .parse()
        .map_err(|_| AuthError::BadRequest("Invalid callback URL".into()))?;

    let mut config = state.resolver.clone();
    if let Some(verifier) = cookies::get_pkce_verifier(&jar) {
        config = config.with_code_verifier(verifier);
    }

    let resolver = SessionResolver::new(Arc::new(state.client.scoped()), config);
    let resolution = resolver.resolve(&url).await;

    let mut jar = jar;
    if let SessionState::Ready(session) = &resolution.state {
        let api_path = &state.settings.api_path;
        jar = jar
            .add(cookies::recovery_cookie(
                &session.access_token,
                state.settings.secure_cookies,
                api_path,
                state.settings.recovery_ttl_minutes,
            ))
            .remove(cookies::clear_pkce_cookie(api_path));
        tracing::info!(user_id = ?session.user_id(), "Recovery session established");
    }

    Ok((
        jar,
        Json(ResolveResponse {
            status: resolution.page_status(),
            cleaned_url: resolution.cleaned_url.to_string(),
        }),
    ))
}

// ── Reset password ─────────────────────────────────────────────────

/// What lets the reset route act for the user.
enum RecoveryProof {
    Session(Session),
    /// Unredeemed `token_hash` posted with the form.
    Token(String),
}

async fn reset_password<S: RateLimitStore>(
    State(state): State<AuthState<S>>,
    jar: PrivateCookieJar,
    recovery: Option<RecoverySession>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<(PrivateCookieJar, Json<Value>), AuthError> {
    let proof = match (recovery, body.token.filter(|t| !t.is_empty())) {
        (Some(RecoverySession(session)), _) => RecoveryProof::Session(session),
        (None, Some(token)) => RecoveryProof::Token(token),
        (None, None) => {
            return Err(AuthError::BadRequest("Reset token is required".into()));
        }
    };
    if body.password.is_empty() {
        return Err(AuthError::BadRequest("Password is required".into()));
    }
    match &body.confirm_password {
        Some(confirmation) => validate_new_password(&body.password, confirmation),
        None => validate_password(&body.password),
    }
    .map_err(|e| AuthError::BadRequest(e.to_string()))?;

    let timeout = state.resolver.provider_timeout();
    let client = state.client.scoped();
    match proof {
        RecoveryProof::Session(session) => client.set_session(session).await,
        RecoveryProof::Token(token) => {
            let otp_type = body.otp_type.as_deref().and_then(OtpType::parse);
            if otp_type != Some(OtpType::Recovery) {
                return Err(AuthError::BadRequest(
                    "Reset link has expired or is invalid. Please request a new password reset."
                        .into(),
                ));
            }
            bounded(
                "verify otp",
                timeout,
                client.verify_otp(&token, OtpType::Recovery),
            )
            .await
            .map_err(|e| {
                log_provider_error(&state.settings, "Recovery token verification failed", &e);
                AuthError::BadRequest(
                    "Invalid or expired reset link. Please request a new password reset.".into(),
                )
            })?;
        }
    }

    let user = bounded("password update", timeout, client.update_password(&body.password))
        .await
        .map_err(|e| {
            log_provider_error(&state.settings, "Password update failed", &e);
            AuthError::BadRequest(
                "Failed to update password. Please try again or request a new reset link."
                    .into(),
            )
        })?;

    if let Err(e) = bounded("sign out", timeout, client.sign_out()).await {
        tracing::warn!(error = %e, "Sign-out after password reset failed");
    }
    tracing::info!(user_id = %user.id, "Password reset completed");

    let jar = jar.remove(cookies::clear_recovery_cookie(&state.settings.api_path));
    Ok((
        jar,
        Json(json!({ "message": "Password has been successfully reset." })),
    ))
}

// ── Helpers ────────────────────────────────────────────────────────

async fn enforce_limit<S: RateLimitStore>(
    state: &AuthState<S>,
    key: &str,
    limit: RateLimitConfig,
    message: &'static str,
) -> Result<(), AuthError> {
    match state.limiter.check_with(key, limit).await? {
        RateLimitDecision::Allowed { .. } => Ok(()),
        RateLimitDecision::Limited { retry_after } => Err(AuthError::RateLimited {
            message,
            retry_after,
        }),
    }
}

/// Raw provider errors are only logged with development diagnostics on.
fn log_provider_error(settings: &AuthSettings, message: &'static str, error: &Error) {
    if settings.dev_diagnostics {
        tracing::warn!(error = %error, "{message}");
    } else {
        tracing::warn!("{message}");
    }
}

/// Relative in-site path; rejects scheme-relative `//host` targets.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ResolverConfig;
    use crate::gotrue::GoTrueClient;
    use crate::rate_limit::{MemoryRateLimitStore, RateLimitConfig};
    use crate::testing::stub::{
        StubProvider, VALID_CODE, VALID_EMAIL, VALID_NAME, VALID_PASSWORD, VALID_TOKEN_HASH,
    };

    fn config(stub: &StubProvider) -> AuthRoutesConfig {
        AuthRoutesConfig::new(GoTrueClient::new(stub.config()))
            .with_secure_cookies(false)
            .with_resolver_config(
                ResolverConfig::default()
                    .with_probe_delay(Duration::from_millis(5))
                    .with_grace_period(Duration::from_millis(5)),
            )
    }

    fn app(stub: &StubProvider) -> Router {
        auth_routes(config(stub), MemoryRateLimitStore::new())
    }

    fn post_json(path: &str, body: Value, cookies: &[String]) -> Request<Body> {
        let mut request = Request::post(path)
            .header(CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1");
        if !cookies.is_empty() {
            request = request.header(COOKIE, cookies.join("; "));
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `name=value` pairs of non-removal `Set-Cookie` headers.
    fn issued_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter(|v| !v.contains("Max-Age=0"))
            .filter_map(|v| v.split(';').next())
            .map(str::to_string)
            .collect()
    }

    fn removes_cookie(response: &Response, name: &str) -> bool {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.starts_with(&format!("{name}=")) && v.contains("Max-Age=0"))
    }

    async fn get_location(app: Router, uri: &str) -> String {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        response.headers()[LOCATION].to_str().unwrap().to_string()
    }

    // ── callback ──

    #[tokio::test]
    async fn callback_forwards_code_as_recovery() {
        let stub = StubProvider::spawn().await;
        let location = get_location(app(&stub), "/auth/callback?code=abc%2F1").await;
        assert_eq!(location, "/reset-password?code=abc%2F1&type=recovery");
    }

    #[tokio::test]
    async fn callback_honours_local_next_only() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        let location = get_location(
            app.clone(),
            "/auth/callback?code=abc&next=%2Faccount%2Freset%3Ftab%3D2",
        )
        .await;
        assert_eq!(location, "/account/reset?tab=2&code=abc&type=recovery");

        let location = get_location(
            app,
            "/auth/callback?code=abc&next=%2F%2Fevil.test%2Fphish",
        )
        .await;
        assert_eq!(location, "/reset-password?code=abc&type=recovery");
    }

    #[tokio::test]
    async fn callback_without_code_goes_to_reset_page() {
        let stub = StubProvider::spawn().await;
        let location = get_location(app(&stub), "/auth/callback?next=%2Felsewhere").await;
        assert_eq!(location, "/reset-password");
    }

    // ── forgot-password ──

    #[tokio::test]
    async fn forgot_password_stores_verifier_and_answers_generically() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/forgot-password",
                json!({ "email": "  Ana@Payroll.test" }),
                &[],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/forgot-password",
                json!({ "email": "Ana@Payroll.test" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            issued_cookies(&response)
                .iter()
                .any(|c| c.starts_with("__payroll_pkce="))
        );
        assert_eq!(json_body(response).await["message"], RECOVERY_SENT);
        assert_eq!(stub.last_body("recover").unwrap()["email"], VALID_EMAIL);
    }

    #[tokio::test]
    async fn forgot_password_validates_email() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        let response = app
            .clone()
            .oneshot(post_json("/api/auth/forgot-password", json!({}), &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Email is required");

        let response = app
            .oneshot(post_json(
                "/api/auth/forgot-password",
                json!({ "email": "not-an-email" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["error"], "Invalid email format");
        assert_eq!(stub.hits("recover"), 0);
    }

    #[tokio::test]
    async fn forgot_password_is_rate_limited_per_ip() {
        let stub = StubProvider::spawn().await;
        let app = auth_routes(
            config(&stub).with_rate_limit(RateLimitConfig {
                limit: 2,
                window: Duration::from_secs(60),
            }),
            MemoryRateLimitStore::new(),
        );

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/auth/forgot-password",
                    json!({ "email": VALID_EMAIL }),
                    &[],
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(post_json(
                "/api/auth/forgot-password",
                json!({ "email": VALID_EMAIL }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(stub.hits("recover"), 2);
    }

    // ── login ──

    #[tokio::test]
    async fn login_rejects_bad_credentials_generically() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": VALID_EMAIL, "password": "WrongPass1" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], INVALID_CREDENTIALS);

        // Too short to be a real password: rejected without a provider call.
        let response = app
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": VALID_EMAIL, "password": "abc" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(stub.hits("token"), 1);
    }

    #[tokio::test]
    async fn login_success_resets_the_limit() {
        let stub = StubProvider::spawn().await;
        let app = auth_routes(
            config(&stub).with_rate_limit(RateLimitConfig {
                limit: 2,
                window: Duration::from_secs(60),
            }),
            MemoryRateLimitStore::new(),
        );
        let attempt = |password: &str| {
            post_json(
                "/api/auth/login",
                json!({ "email": VALID_EMAIL, "password": password }),
                &[],
            )
        };

        let response = app.clone().oneshot(attempt("WrongPass1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.clone().oneshot(attempt(VALID_PASSWORD)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            issued_cookies(&response)
                .iter()
                .any(|c| c.starts_with("__payroll_session="))
        );
        let body = json_body(response).await;
        assert_eq!(body["id"], "user-1");
        assert_eq!(body["email"], VALID_EMAIL);
        assert_eq!(body["name"], VALID_NAME);

        for _ in 0..2 {
            let response = app.clone().oneshot(attempt("WrongPass1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        let response = app.oneshot(attempt("WrongPass1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    // ── signup ──

    #[tokio::test]
    async fn signup_creates_account_with_trimmed_name() {
        let stub = StubProvider::spawn().await;
        let long_name = format!("  {}  ", "n".repeat(120));
        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/signup",
                json!({ "email": "New@Payroll.test", "password": "Payroll2024", "name": long_name }),
                &[],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let sent = stub.last_body("signup").unwrap();
        assert_eq!(sent["email"], "new@payroll.test");
        assert_eq!(sent["data"]["full_name"].as_str().map(str::len), Some(100));

        let body = json_body(response).await;
        assert_eq!(body["id"], "user-2");
        assert_eq!(body["email"], "new@payroll.test");
        assert_eq!(body["name"], "n".repeat(100));
    }

    #[tokio::test]
    async fn signup_validates_before_calling_provider() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        for (body, error) in [
            (json!({ "email": "new@payroll.test" }), "Email and password are required"),
            (json!({ "email": "nope", "password": "Payroll2024" }), "Invalid email format"),
            (
                json!({ "email": "new@payroll.test", "password": "short" }),
                "Password must be at least 8 characters",
            ),
        ] {
            let response = app
                .clone()
                .oneshot(post_json("/api/auth/signup", body, &[]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(json_body(response).await["error"], error);
        }
        assert_eq!(stub.hits("signup"), 0);
    }

    #[tokio::test]
    async fn signup_hides_provider_rejection() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/signup",
                json!({ "email": VALID_EMAIL, "password": "Payroll2024" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "Unable to create account. Please try again."
        );
    }

    #[tokio::test]
    async fn signup_allows_three_attempts_per_window() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);
        let attempt = || {
            post_json(
                "/api/auth/signup",
                json!({ "email": VALID_EMAIL, "password": "Payroll2024" }),
                &[],
            )
        };

        for _ in 0..3 {
            let response = app.clone().oneshot(attempt()).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        let response = app.clone().oneshot(attempt()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        assert_eq!(
            json_body(response).await["error"],
            "Too many signup attempts. Please try again later."
        );
        assert_eq!(stub.hits("signup"), 3);

        // Login keeps its own, larger budget.
        let response = app
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": VALID_EMAIL, "password": VALID_PASSWORD }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // ── me / logout ──

    async fn login_cookies(app: &Router) -> Vec<String> {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": VALID_EMAIL, "password": VALID_PASSWORD }),
                &[],
            ))
            .await
            .unwrap();
        issued_cookies(&response)
    }

    fn get_with(uri: &str, headers: &[(&str, String)]) -> Request<Body> {
        let mut request = Request::get(uri);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        request.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn me_returns_profile_for_session_cookie() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);
        let cookies = login_cookies(&app).await;

        let response = app
            .oneshot(get_with("/api/auth/me", &[("cookie", cookies.join("; "))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], "user-1");
        assert_eq!(body["email"], VALID_EMAIL);
        assert_eq!(body["name"], VALID_NAME);
    }

    #[tokio::test]
    async fn me_accepts_bearer_token() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(get_with(
                "/api/auth/me",
                &[("authorization", "Bearer stub-access".to_string())],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stub.hits("get_user"), 1);
    }

    #[tokio::test]
    async fn me_without_valid_session_is_unauthorized() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        let response = app
            .clone()
            .oneshot(get_with("/api/auth/me", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Not authenticated");
        assert_eq!(stub.hits("get_user"), 0);

        let response = app
            .oneshot(get_with(
                "/api/auth/me",
                &[("authorization", "Bearer revoked".to_string())],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Not authenticated");
    }

    #[tokio::test]
    async fn logout_signs_out_and_clears_cookie() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);
        let cookies = login_cookies(&app).await;

        let response = app
            .oneshot(post_json("/api/auth/logout", json!({}), &cookies))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(removes_cookie(&response, "__payroll_session"));
        assert_eq!(json_body(response).await["success"], true);
        assert_eq!(stub.hits("logout"), 1);
    }

    #[tokio::test]
    async fn logout_without_session_still_succeeds() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(post_json("/api/auth/logout", json!({}), &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["success"], true);
        assert_eq!(stub.hits("logout"), 0);
    }

    // ── resolve ──

    #[tokio::test]
    async fn resolve_token_hash_issues_recovery_cookie() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/resolve",
                json!({
                    "url": format!(
                        "https://payroll.test/reset-password?token_hash={VALID_TOKEN_HASH}&type=recovery&lang=en"
                    )
                }),
                &[],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            issued_cookies(&response)
                .iter()
                .any(|c| c.starts_with("__payroll_recovery="))
        );
        let body = json_body(response).await;
        assert_eq!(body["isChecking"], false);
        assert_eq!(body["hasSession"], true);
        assert_eq!(body["error"], Value::Null);
        assert_eq!(body["cleanedUrl"], "https://payroll.test/reset-password?lang=en");
    }

    #[tokio::test]
    async fn resolve_reports_expired_link() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/resolve",
                json!({
                    "url": "https://payroll.test/reset-password#error=access_denied&error_code=otp_expired&error_description=Email+link+is+invalid+or+has+expired"
                }),
                &[],
            ))
            .await
            .unwrap();

        assert!(issued_cookies(&response).is_empty());
        let body = json_body(response).await;
        assert_eq!(body["hasSession"], false);
        assert_eq!(
            body["error"],
            "The reset link has expired. Please request a new password reset link."
        );
        assert_eq!(body["cleanedUrl"], "https://payroll.test/reset-password");
        assert_eq!(stub.hits("verify") + stub.hits("token"), 0);
    }

    #[tokio::test]
    async fn resolve_exchanges_code_with_stored_verifier() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/forgot-password",
                json!({ "email": VALID_EMAIL }),
                &[],
            ))
            .await
            .unwrap();
        let cookies = issued_cookies(&response);

        let response = app
            .oneshot(post_json(
                "/api/auth/resolve",
                json!({ "url": format!("https://payroll.test/reset-password?code={VALID_CODE}&type=recovery") }),
                &cookies,
            ))
            .await
            .unwrap();

        assert!(removes_cookie(&response, "__payroll_pkce"));
        assert_eq!(json_body(response).await["hasSession"], true);
        let exchange = stub.last_body("token").unwrap();
        assert_eq!(exchange["auth_code"], VALID_CODE);
        assert!(exchange["code_verifier"].as_str().is_some_and(|v| v.len() >= 43));
    }

    #[tokio::test]
    async fn resolve_rejects_relative_url() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/resolve",
                json!({ "url": "/reset-password?code=x" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // ── reset-password ──

    #[tokio::test]
    async fn reset_with_recovery_cookie_updates_and_signs_out() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/resolve",
                json!({ "url": format!("https://payroll.test/reset-password?token_hash={VALID_TOKEN_HASH}&type=recovery") }),
                &[],
            ))
            .await
            .unwrap();
        let cookies = issued_cookies(&response);

        let response = app
            .oneshot(post_json(
                "/api/auth/reset-password",
                json!({ "password": "NewPayroll1", "confirmPassword": "NewPayroll1" }),
                &cookies,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(removes_cookie(&response, "__payroll_recovery"));
        assert_eq!(
            json_body(response).await["message"],
            "Password has been successfully reset."
        );
        assert_eq!(stub.last_body("user").unwrap()["password"], "NewPayroll1");
        assert_eq!(stub.hits("logout"), 1);
    }

    #[tokio::test]
    async fn reset_with_body_token() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/reset-password",
                json!({ "password": "NewPayroll1", "token": VALID_TOKEN_HASH, "type": "recovery" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stub.hits("user"), 1);
    }

    #[tokio::test]
    async fn reset_requires_a_recovery_session() {
        let stub = StubProvider::spawn().await;
        let response = app(&stub)
            .oneshot(post_json(
                "/api/auth/reset-password",
                json!({ "password": "NewPayroll1" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Reset token is required");
    }

    #[tokio::test]
    async fn reset_enforces_password_policy_before_verifying() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/reset-password",
                json!({ "password": "short", "token": VALID_TOKEN_HASH, "type": "recovery" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(
            json_body(response).await["error"],
            "Password must be at least 8 characters"
        );

        let response = app
            .oneshot(post_json(
                "/api/auth/reset-password",
                json!({
                    "password": "NewPayroll1",
                    "confirmPassword": "NewPayroll2",
                    "token": VALID_TOKEN_HASH,
                    "type": "recovery",
                }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["error"], "Passwords do not match");
        assert_eq!(stub.hits("verify"), 0);
    }

    #[tokio::test]
    async fn reset_rejects_unusable_tokens() {
        let stub = StubProvider::spawn().await;
        let app = app(&stub);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/reset-password",
                json!({ "password": "NewPayroll1", "token": "stale", "type": "recovery" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(
            json_body(response).await["error"],
            "Invalid or expired reset link. Please request a new password reset."
        );

        let response = app
            .oneshot(post_json(
                "/api/auth/reset-password",
                json!({ "password": "NewPayroll1", "token": VALID_TOKEN_HASH, "type": "signup" }),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(stub.hits("user"), 0);
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "198.51.100.2");
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }
}
