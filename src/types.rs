use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Identity-provider user identifier (the `sub` of the session's user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Authenticated user attached to a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub new_email: Option<String>,
    /// Profile data set at signup (`full_name`, `name`).
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl User {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            email: None,
            new_email: None,
            user_metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.user_metadata = serde_json::json!({ "full_name": name, "name": name });
        self
    }

    /// `full_name` from the profile metadata, falling back to `name`.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        ["full_name", "name"]
            .into_iter()
            .filter_map(|key| self.user_metadata.get(key)?.as_str())
            .find(|name| !name.is_empty())
    }
}

/// Session handle issued by the identity provider.
///
/// Opaque to the resolver: it only cares that one exists.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Session {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".into()
}

impl Session {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
            refresh_token: None,
            user: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref().map(|u| &u.id)
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"***")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// One-time token kinds accepted by the provider's verify endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum OtpType {
    #[display("recovery")]
    Recovery,
    #[display("email_change")]
    EmailChange,
    #[display("signup")]
    Signup,
    #[display("magiclink")]
    Magiclink,
    #[display("invite")]
    Invite,
    #[display("email")]
    Email,
}

impl OtpType {
    /// Parses the `type` URL parameter. Unknown values yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recovery" => Some(Self::Recovery),
            "email_change" => Some(Self::EmailChange),
            "signup" => Some(Self::Signup),
            "magiclink" => Some(Self::Magiclink),
            "invite" => Some(Self::Invite),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// Session-change notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum AuthChangeEvent {
    PasswordRecovery,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Notification broadcast by an identity provider when its session changes.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthStateChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

impl AuthStateChange {
    #[must_use]
    pub fn new(event: AuthChangeEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}
