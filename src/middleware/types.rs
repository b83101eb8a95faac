use serde::{Deserialize, Serialize};

use crate::state::PageStatus;
use crate::types::User;

#[derive(Debug, Deserialize)]
pub(super) struct ForgotPasswordRequest {
    #[serde(default)]
    pub(super) email: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginRequest {
    #[serde(default)]
    pub(super) email: String,
    #[serde(default)]
    pub(super) password: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct SignupRequest {
    #[serde(default)]
    pub(super) email: String,
    #[serde(default)]
    pub(super) password: String,
    pub(super) name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResolveRequest {
    pub(super) url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ResetPasswordRequest {
    #[serde(default)]
    pub(super) password: String,
    pub(super) confirm_password: Option<String>,
    pub(super) token: Option<String>,
    #[serde(rename = "type")]
    pub(super) otp_type: Option<String>,
}

/// Body of the resolve route: the page status plus the URL to put in the
/// address bar with a history replace.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ResolveResponse {
    #[serde(flatten)]
    pub(super) status: PageStatus,
    pub(super) cleaned_url: String,
}

/// Public profile returned by login, signup and `me`.
#[derive(Debug, Serialize)]
pub(super) struct UserResponse {
    pub(super) id: String,
    pub(super) email: Option<String>,
    pub(super) name: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            name: user.display_name().map(str::to_string),
            id: user.id.to_string(),
            email: user.email,
        }
    }
}
