//! Scripted identity provider for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::Error;
use crate::provider::{IdentityProvider, SessionEvents};
use crate::types::{AuthChangeEvent, AuthStateChange, OtpType, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    GetSession,
    VerifyOtp(String, OtpType),
    ExchangeCode(String, Option<String>),
    SignOut,
}

pub(crate) struct ScriptedProvider {
    session_from_call: Mutex<Option<(u32, Session)>>,
    get_session_calls: AtomicU32,
    otp: Mutex<HashMap<String, Session>>,
    exchange: Mutex<HashMap<String, Session>>,
    latency: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Call>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session_from_call: Mutex::new(None),
            get_session_calls: AtomicU32::new(0),
            otp: Mutex::new(HashMap::new()),
            exchange: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            events,
        }
    }

    /// `get_session` starts returning `session` on its `nth` call (1-based).
    pub(crate) fn session_on_call(self, nth: u32, session: Session) -> Self {
        *self.session_from_call.lock().unwrap() = Some((nth, session));
        self
    }

    pub(crate) fn accept_otp(self, token_hash: &str, session: Session) -> Self {
        self.otp
            .lock()
            .unwrap()
            .insert(token_hash.to_string(), session);
        self
    }

    pub(crate) fn accept_code(self, code: &str, session: Session) -> Self {
        self.exchange
            .lock()
            .unwrap()
            .insert(code.to_string(), session);
        self
    }

    /// Every redemption call sleeps this long before answering.
    pub(crate) fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }

    pub(crate) fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let _ = self.events.send(AuthStateChange::new(event, session));
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn redemption_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::VerifyOtp(..) | Call::ExchangeCode(..)))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl IdentityProvider for ScriptedProvider {
    async fn get_session(&self) -> Result<Option<Session>, Error> {
        self.record(Call::GetSession);
        let n = self.get_session_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.session_from_call.lock().unwrap().clone();
        Ok(scripted.and_then(|(from, session)| (n >= from).then_some(session)))
    }

    fn subscribe(&self) -> SessionEvents {
        SessionEvents::new(self.events.subscribe())
    }

    async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, Error> {
        self.record(Call::VerifyOtp(token_hash.to_string(), otp_type));
        self.delay().await;
        let found = self.otp.lock().unwrap().get(token_hash).cloned();
        found.ok_or_else(|| Error::Provider {
            operation: "verify otp",
            status: Some(403),
            detail: "Token has expired or is invalid".into(),
        })
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, Error> {
        self.record(Call::ExchangeCode(
            code.to_string(),
            code_verifier.map(str::to_string),
        ));
        self.delay().await;
        let found = self.exchange.lock().unwrap().get(code).cloned();
        found.ok_or_else(|| Error::Provider {
            operation: "code exchange",
            status: Some(400),
            detail: "invalid flow state, no valid flow state found".into(),
        })
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.record(Call::SignOut);
        Ok(())
    }
}

/// Loopback HTTP stand-in for the identity provider's auth API.
#[cfg(feature = "axum")]
pub(crate) mod stub {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::Router;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use serde_json::{Value, json};
    use url::Url;

    use crate::gotrue::ProviderConfig;

    pub(crate) const VALID_TOKEN_HASH: &str = "pkce_valid_hash";
    pub(crate) const VALID_CODE: &str = "valid-code";
    pub(crate) const VALID_EMAIL: &str = "ana@payroll.test";
    pub(crate) const VALID_PASSWORD: &str = "Payroll2024";
    pub(crate) const VALID_NAME: &str = "Ana Ruiz";

    type Log = Arc<Mutex<Vec<(&'static str, Value)>>>;

    pub(crate) struct StubProvider {
        base_url: Url,
        log: Log,
    }

    impl StubProvider {
        pub(crate) async fn spawn() -> Self {
            let log = Log::default();
            let app = Router::new()
                .route("/auth/v1/verify", post(verify))
                .route("/auth/v1/token", post(token))
                .route("/auth/v1/recover", post(recover))
                .route("/auth/v1/signup", post(signup))
                .route("/auth/v1/user", get(current_user).put(update_user))
                .route("/auth/v1/logout", post(logout))
                .with_state(log.clone());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base_url: format!("http://{addr}/auth/v1").parse().unwrap(),
                log,
            }
        }

        pub(crate) fn config(&self) -> ProviderConfig {
            ProviderConfig::new(self.base_url.clone(), "stub-anon-key")
        }

        pub(crate) fn last_body(&self, endpoint: &str) -> Option<Value> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(e, _)| *e == endpoint)
                .map(|(_, body)| body.clone())
        }

        pub(crate) fn hits(&self, endpoint: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(e, _)| *e == endpoint)
                .count()
        }
    }

    fn user_body() -> Value {
        json!({
            "id": "user-1",
            "email": VALID_EMAIL,
            "user_metadata": { "full_name": VALID_NAME, "name": VALID_NAME },
        })
    }

    fn session_body() -> Value {
        json!({
            "access_token": "stub-access",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "stub-refresh",
            "user": user_body(),
        })
    }

    fn is_authorized(headers: &HeaderMap) -> bool {
        headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some("Bearer stub-access")
    }

    fn rejected(status: StatusCode, error_code: &str, msg: &str) -> Response {
        (
            status,
            Json(json!({ "code": status.as_u16(), "error_code": error_code, "msg": msg })),
        )
            .into_response()
    }

    async fn verify(State(log): State<Log>, Json(body): Json<Value>) -> Response {
        log.lock().unwrap().push(("verify", body.clone()));
        if body["token_hash"] == VALID_TOKEN_HASH {
            Json(session_body()).into_response()
        } else {
            rejected(
                StatusCode::FORBIDDEN,
                "otp_expired",
                "Token has expired or is invalid",
            )
        }
    }

    async fn token(
        State(log): State<Log>,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> Response {
        log.lock().unwrap().push(("token", body.clone()));
        let accepted = match query.get("grant_type").map(String::as_str) {
            Some("pkce") => body["auth_code"] == VALID_CODE,
            Some("password") => {
                body["email"] == VALID_EMAIL && body["password"] == VALID_PASSWORD
            }
            _ => false,
        };
        if accepted {
            Json(session_body()).into_response()
        } else {
            rejected(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "invalid flow state, no valid flow state found",
            )
        }
    }

    async fn recover(State(log): State<Log>, Json(body): Json<Value>) -> Json<Value> {
        log.lock().unwrap().push(("recover", body));
        Json(json!({}))
    }

    /// Every address but [`VALID_EMAIL`] is free; new accounts await confirmation.
    async fn signup(State(log): State<Log>, Json(body): Json<Value>) -> Response {
        log.lock().unwrap().push(("signup", body.clone()));
        if body["email"] == VALID_EMAIL {
            return rejected(
                StatusCode::UNPROCESSABLE_ENTITY,
                "user_already_exists",
                "User already registered",
            );
        }
        Json(json!({
            "id": "user-2",
            "email": body["email"],
            "user_metadata": body["data"],
        }))
        .into_response()
    }

    async fn current_user(State(log): State<Log>, headers: HeaderMap) -> Response {
        log.lock().unwrap().push(("get_user", Value::Null));
        if is_authorized(&headers) {
            Json(user_body()).into_response()
        } else {
            rejected(StatusCode::UNAUTHORIZED, "bad_jwt", "invalid JWT")
        }
    }

    async fn update_user(
        State(log): State<Log>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        log.lock().unwrap().push(("user", body));
        if is_authorized(&headers) {
            Json(user_body()).into_response()
        } else {
            rejected(StatusCode::UNAUTHORIZED, "no_authorization", "invalid JWT")
        }
    }

    async fn logout(State(log): State<Log>) -> StatusCode {
        log.lock().unwrap().push(("logout", Value::Null));
        StatusCode::NO_CONTENT
    }
}
