use std::time::Duration;

use crate::provider::{IdentityProvider, bounded};
use crate::types::Session;

/// Polls the provider for a session it may establish on its own.
///
/// The provider can pick up fragment-borne tokens asynchronously, so a single
/// `get_session` right after page load is not conclusive.
pub struct SessionProber<'a, P> {
    provider: &'a P,
    attempts: u32,
    delay: Duration,
    timeout: Duration,
}

impl<'a, P: IdentityProvider> SessionProber<'a, P> {
    #[must_use]
    pub fn new(provider: &'a P, attempts: u32, delay: Duration, timeout: Duration) -> Self {
        Self {
            provider,
            attempts: attempts.max(2),
            delay,
            timeout,
        }
    }

    /// Probes `attempts` times, `delay` apart, returning the first session seen.
    ///
    /// Errors and timeouts count as "no session".
    pub async fn probe(&self) -> Option<Session> {
        for attempt in 0..self.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(session) = self.probe_once().await {
                tracing::debug!(attempt, "Existing session found");
                return Some(session);
            }
        }
        None
    }

    /// A single bounded `get_session`.
    pub async fn probe_once(&self) -> Option<Session> {
        match bounded("get session", self.timeout, self.provider.get_session()).await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(error = %e, "Session probe failed");
                None
            }
        }
    }
}
