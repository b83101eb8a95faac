use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::Error;
use crate::types::{AuthStateChange, OtpType, Session};

/// Capability surface of the external identity provider.
///
/// [`GoTrueClient`](crate::GoTrueClient) is the HTTP implementation; tests
/// and embedders can supply their own.
///
/// # Example
///
/// ```rust,ignore
/// impl IdentityProvider for MyProvider {
///     async fn get_session(&self) -> Result<Option<Session>, Error> {
///         Ok(self.current.read().await.clone())
///     }
///     // ...
/// }
/// ```
pub trait IdentityProvider: Send + Sync + 'static {
    /// Current session, if the provider holds one.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>, Error>> + Send;

    /// Subscribe to session-change notifications.
    ///
    /// Each call returns an independent subscription that only sees
    /// notifications sent after it was created.
    fn subscribe(&self) -> SessionEvents;

    /// Redeem a one-time token hash.
    fn verify_otp(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    /// Redeem a PKCE authorization code.
    fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    /// End the current session.
    fn sign_out(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Bounds a provider call. Elapsed calls become [`Error::Timeout`].
pub(crate) async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(Error::Timeout(operation)))
}

/// Stream of [`AuthStateChange`] notifications from one subscription.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct SessionEvents {
    rx: broadcast::Receiver<AuthStateChange>,
}

impl SessionEvents {
    #[must_use]
    pub fn new(rx: broadcast::Receiver<AuthStateChange>) -> Self {
        Self { rx }
    }

    /// Next notification, or `None` once the provider is gone.
    ///
    /// Notifications missed because the subscriber lagged are skipped.
    pub async fn next(&mut self) -> Option<AuthStateChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Session event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
