use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::Key;

use super::cookies;
use super::error::AuthError;
use super::state::AuthState;
use crate::rate_limit::RateLimitStore;
use crate::types::Session;

/// Recovery session established by the resolve route, read from its private cookie.
///
/// Rejects with `400` when absent. Take it as `Option<RecoverySession>` to
/// fall back to another source, as the reset route does with a body token.
#[derive(Debug, Clone)]
pub struct RecoverySession(pub Session);

async fn from_cookie<S: RateLimitStore>(
    parts: &mut Parts,
    state: &AuthState<S>,
) -> Option<RecoverySession> {
    let jar = <PrivateCookieJar<Key> as FromRequestParts<AuthState<S>>>::from_request_parts(
        parts, state,
    )
    .await
    .ok()?;
    cookies::get_recovery_token(&jar).map(|token| RecoverySession(Session::new(token)))
}

impl<S: RateLimitStore> FromRequestParts<AuthState<S>> for RecoverySession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState<S>,
    ) -> Result<Self, Self::Rejection> {
        from_cookie(parts, state)
            .await
            .ok_or_else(|| AuthError::BadRequest("Reset token is required".into()))
    }
}

impl<S: RateLimitStore> OptionalFromRequestParts<AuthState<S>> for RecoverySession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState<S>,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(from_cookie(parts, state).await)
    }
}

/// Access token of the caller's signed-in session.
///
/// Taken from an `Authorization: Bearer` header, or else the session cookie
/// set by the login route. Rejects with `401` when neither is present.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

async fn session_token<S: RateLimitStore>(
    parts: &mut Parts,
    state: &AuthState<S>,
) -> Option<SessionToken> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    if let Some(token) = bearer {
        return Some(SessionToken(token));
    }
    let jar = <PrivateCookieJar<Key> as FromRequestParts<AuthState<S>>>::from_request_parts(
        parts, state,
    )
    .await
    .ok()?;
    cookies::get_session_token(&jar).map(SessionToken)
}

impl<S: RateLimitStore> FromRequestParts<AuthState<S>> for SessionToken {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState<S>,
    ) -> Result<Self, Self::Rejection> {
        session_token(parts, state)
            .await
            .ok_or_else(|| AuthError::Unauthorized("Not authenticated".into()))
    }
}

impl<S: RateLimitStore> OptionalFromRequestParts<AuthState<S>> for SessionToken {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState<S>,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(session_token(parts, state).await)
    }
}
