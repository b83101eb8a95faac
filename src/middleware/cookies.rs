use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

const PKCE_COOKIE_NAME: &str = "__payroll_pkce";
const RECOVERY_COOKIE_NAME: &str = "__payroll_recovery";
const SESSION_COOKIE_NAME: &str = "__payroll_session";
/// Provider access tokens live an hour unless the session says otherwise.
const SESSION_DEFAULT_SECS: i64 = 3600;

/// PKCE verifier for the recovery mail just requested.
pub(super) fn pkce_cookie(
    code_verifier: &str,
    secure: bool,
    api_path: &str,
    ttl_minutes: i64,
) -> Cookie<'static> {
    Cookie::build((PKCE_COOKIE_NAME, code_verifier.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(api_path.to_string())
        .max_age(Duration::minutes(ttl_minutes))
        .build()
}

pub(super) fn clear_pkce_cookie(api_path: &str) -> Cookie<'static> {
    Cookie::build((PKCE_COOKIE_NAME, ""))
        .path(api_path.to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Access token of a resolved recovery session, read back by the reset route.
pub(super) fn recovery_cookie(
    access_token: &str,
    secure: bool,
    api_path: &str,
    ttl_minutes: i64,
) -> Cookie<'static> {
    Cookie::build((RECOVERY_COOKIE_NAME, access_token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path(api_path.to_string())
        .max_age(Duration::minutes(ttl_minutes))
        .build()
}

pub(super) fn clear_recovery_cookie(api_path: &str) -> Cookie<'static> {
    Cookie::build((RECOVERY_COOKIE_NAME, ""))
        .path(api_path.to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Access token of a signed-in session, for `me` and `logout`. Expires
/// with the token.
pub(super) fn session_cookie(
    access_token: &str,
    secure: bool,
    expires_in: Option<u64>,
) -> Cookie<'static> {
    let max_age = expires_in
        .and_then(|secs| i64::try_from(secs).ok())
        .unwrap_or(SESSION_DEFAULT_SECS);
    Cookie::build((SESSION_COOKIE_NAME, access_token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(max_age))
        .build()
}

pub(super) fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

pub(super) fn get_pkce_verifier(jar: &PrivateCookieJar) -> Option<String> {
    jar.get(PKCE_COOKIE_NAME).map(|c| c.value().to_string())
}

pub(super) fn get_recovery_token(jar: &PrivateCookieJar) -> Option<String> {
    jar.get(RECOVERY_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

pub(super) fn get_session_token(jar: &PrivateCookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
