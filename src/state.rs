//! Resolution state and the settle-once guard.

use serde::Serialize;
use tokio::sync::watch;

use crate::artifacts::CallbackError;
use crate::types::Session;

/// How a provider-reported URL error is presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// `error_code` is `otp_expired` or `expired`.
    Expired,
    /// `error_code` is `invalid_token` or `invalid`.
    Invalid,
    /// Any other code, with the provider's decoded description.
    Described(String),
    /// Nothing usable beyond the `error` flag itself.
    Generic,
}

impl ProviderErrorKind {
    #[must_use]
    pub fn classify(error: &CallbackError) -> Self {
        match error.code.as_deref() {
            Some("otp_expired" | "expired") => Self::Expired,
            Some("invalid_token" | "invalid") => Self::Invalid,
            _ => match &error.description {
                Some(desc) => Self::Described(desc.clone()),
                None => Self::Generic,
            },
        }
    }
}

/// Why resolution ended in [`SessionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The redirect URL carried explicit error fields.
    ProviderReported(ProviderErrorKind),
    /// Every redemption method was tried without producing a session.
    RedemptionFailed,
    /// No credential in the URL and no session after the grace period.
    MissingArtifact,
}

impl FailureReason {
    /// Message safe to show the end user. Never contains raw provider errors.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderReported(ProviderErrorKind::Expired) => {
                "The reset link has expired. Please request a new password reset link.".into()
            }
            Self::ProviderReported(ProviderErrorKind::Invalid) => {
                "The reset link is invalid. Please request a new password reset link.".into()
            }
            Self::ProviderReported(ProviderErrorKind::Described(desc)) => desc.clone(),
            Self::ProviderReported(ProviderErrorKind::Generic) => {
                "Invalid or expired reset link. Please request a new password reset link.".into()
            }
            Self::RedemptionFailed => {
                "Invalid or expired reset link. Please request a new password reset.".into()
            }
            Self::MissingArtifact => {
                "Invalid or missing reset token. Please request a new password reset link.".into()
            }
        }
    }
}

/// Lifecycle of one callback resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unresolved,
    Checking,
    Ready(Session),
    Failed(FailureReason),
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Ready(session) => Some(session),
            _ => None,
        }
    }

    /// Projection consumed by the reset/email-change form.
    #[must_use]
    pub fn page_status(&self) -> PageStatus {
        PageStatus {
            is_checking: matches!(self, Self::Unresolved | Self::Checking),
            has_session: matches!(self, Self::Ready(_)),
            error: match self {
                Self::Failed(reason) => Some(reason.user_message()),
                _ => None,
            },
        }
    }
}

/// `{isChecking, hasSession, error}` as the form expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStatus {
    pub is_checking: bool,
    pub has_session: bool,
    pub error: Option<String>,
}

/// Shared resolution state with a one-shot terminal guard.
///
/// All writers go through [`Settlement::settle`] / [`Settlement::begin_checking`];
/// the check and the write happen under the channel's lock, so the first
/// terminal write wins regardless of which task makes it.
#[derive(Debug)]
pub struct Settlement {
    tx: watch::Sender<SessionState>,
}

impl Default for Settlement {
    fn default() -> Self {
        Self::new()
    }
}

impl Settlement {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Unresolved);
        Self { tx }
    }

    /// Moves `Unresolved` to `Checking`. No-op in any other state.
    pub fn begin_checking(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, SessionState::Unresolved) {
                *state = SessionState::Checking;
                true
            } else {
                false
            }
        })
    }

    /// Sets a terminal state unless one is already set.
    ///
    /// Returns `true` if this call won.
    pub fn settle(&self, outcome: SessionState) -> bool {
        debug_assert!(outcome.is_terminal());
        self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = outcome;
                true
            }
        })
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_terminal()
    }

    #[must_use]
    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every transition from now on.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Waits until a terminal state is set.
    pub async fn settled(&self) -> SessionState {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(SessionState::is_terminal).await {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.current(),
        }
    }
}
