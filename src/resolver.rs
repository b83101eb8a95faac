//! Outcome resolution for password-reset and email-change landing pages.
//!
//! ```text
//! Unresolved ──error in URL──────────────────────────────▶ Failed
//!     │
//!     ▼
//! Checking ──probe──▶ Ready
//!     │ code ──────────▶ redeem ──▶ Ready | Failed
//!     │ token_hash ────▶ verify ──▶ Ready | Failed
//!     │ nothing ───────▶ grace, re-probe ──▶ Ready | Failed
//!     └ listener (any time before terminal) ──▶ Ready
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, watch};
use url::Url;

use crate::artifacts::{CallbackArtifacts, strip_consumed};
use crate::config::ResolverConfig;
use crate::error::Error;
use crate::listener::SessionListener;
use crate::probe::SessionProber;
use crate::provider::{IdentityProvider, bounded};
use crate::redeem::{Redeemer, RedemptionAttempt};
use crate::state::{FailureReason, PageStatus, ProviderErrorKind, SessionState, Settlement};

/// Terminal outcome of [`SessionResolver::resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
    pub state: SessionState,
    /// The landing URL with consumed parameters and fragment removed.
    /// Apply it with a history replace, not a navigation.
    pub cleaned_url: Url,
    pub artifacts: CallbackArtifacts,
    /// Redemption calls made, in order. Empty if another path settled first.
    pub attempts: Vec<RedemptionAttempt>,
}

impl Resolution {
    #[must_use]
    pub fn page_status(&self) -> PageStatus {
        self.state.page_status()
    }
}

/// Resolves one landing URL into `Ready` or `Failed`, once.
///
/// ```rust,ignore
/// let resolver = SessionResolver::new(Arc::new(client), ResolverConfig::default());
/// let resolution = resolver.resolve(&landing_url).await;
/// history.replace(resolution.cleaned_url.as_str());
/// render(resolution.page_status());
/// ```
pub struct SessionResolver<P> {
    provider: Arc<P>,
    config: ResolverConfig,
    settlement: Arc<Settlement>,
    started: AtomicBool,
    /// Signalled when a driving call is dropped before settling.
    released: Notify,
}

impl<P: IdentityProvider> SessionResolver<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: ResolverConfig) -> Self {
        Self {
            provider,
            config,
            settlement: Arc::new(Settlement::new()),
            started: AtomicBool::new(false),
            released: Notify::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.settlement.current()
    }

    #[must_use]
    pub fn page_status(&self) -> PageStatus {
        self.settlement.current().page_status()
    }

    /// Observe state transitions (e.g. to show a spinner while `Checking`).
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.settlement.watch()
    }

    /// Runs the resolution for `url`.
    ///
    /// Only one call drives the state machine at a time. Concurrent calls
    /// wait for its terminal state and make no provider calls of their own.
    ///
    /// Dropping the returned future before it completes tears down the
    /// session listener and any pending timer. The next call (or a waiting
    /// one) then drives the resolution again.
    pub async fn resolve(&self, url: &Url) -> Resolution {
        let artifacts = CallbackArtifacts::from_url(url);

        loop {
            // Registered before the swap so a release in between is not missed.
            let released = self.released.notified();
            if !self.started.swap(true, Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                state = self.settlement.settled() => {
                    return Resolution {
                        state,
                        cleaned_url: strip_consumed(url),
                        artifacts,
                        attempts: Vec::new(),
                    };
                }
                () = released => {}
            }
        }
        let _driving = DriveGuard {
            started: &self.started,
            settlement: &self.settlement,
            released: &self.released,
        };

        if self.config.dev_diagnostics {
            tracing::debug!(
                code = ?artifacts.code.as_deref().map(preview),
                token_hash = ?artifacts.token_hash.as_deref().map(preview),
                otp_type = ?artifacts.otp_type,
                has_fragment_params = artifacts.has_fragment_params,
                "Resolving callback"
            );
        }

        let attempts = match &artifacts.error {
            Some(error) => {
                tracing::warn!(
                    error = %error.error,
                    error_code = error.code.as_deref().unwrap_or(""),
                    "Identity provider reported a callback error"
                );
                let kind = ProviderErrorKind::classify(error);
                self.settlement
                    .settle(SessionState::Failed(FailureReason::ProviderReported(kind)));
                Vec::new()
            }
            None => {
                self.settlement.begin_checking();
                let mut listener = SessionListener::spawn(&*self.provider, self.settlement.clone());
                let attempts = tokio::select! {
                    biased;
                    attempts = self.run(&artifacts) => attempts,
                    _ = self.settlement.settled() => Vec::new(),
                };
                listener.unsubscribe();
                attempts
            }
        };

        let state = self.settlement.current();
        match &state {
            SessionState::Ready(_) => tracing::info!("Callback resolved with a session"),
            SessionState::Failed(reason) => tracing::info!(?reason, "Callback resolution failed"),
            _ => {}
        }

        Resolution {
            state,
            cleaned_url: strip_consumed(url),
            artifacts,
            attempts,
        }
    }

    /// Signs out of the provider, e.g. after the new password is stored.
    ///
    /// # Errors
    ///
    /// Propagates the provider error or [`Error::Timeout`].
    pub async fn sign_out(&self) -> Result<(), Error> {
        bounded("sign out", self.config.provider_timeout, self.provider.sign_out()).await
    }

    async fn run(&self, artifacts: &CallbackArtifacts) -> Vec<RedemptionAttempt> {
        let prober = SessionProber::new(
            &*self.provider,
            self.config.probe_attempts,
            self.config.probe_delay,
            self.config.provider_timeout,
        );

        if let Some(session) = prober.probe().await {
            self.settlement.settle(SessionState::Ready(session));
            return Vec::new();
        }

        let redeemer =
            Redeemer::new(&*self.provider, &self.config).with_settlement(&self.settlement);

        let redemption = if artifacts.code.is_some() {
            redeemer.redeem(artifacts).await
        } else if let Some(token_hash) = artifacts.token_hash_for(self.config.otp_type) {
            redeemer.verify_token_hash(token_hash).await
        } else {
            tokio::time::sleep(self.config.grace_period).await;
            let outcome = match prober.probe().await {
                Some(session) => SessionState::Ready(session),
                None if artifacts.is_empty() => SessionState::Failed(FailureReason::MissingArtifact),
                // Something was in the URL but nothing we could redeem.
                None => SessionState::Failed(FailureReason::RedemptionFailed),
            };
            self.settlement.settle(outcome);
            return Vec::new();
        };

        let attempts = redemption.attempts.clone();
        let outcome = match redemption.into_result() {
            Ok(session) => SessionState::Ready(session),
            Err(reason) => SessionState::Failed(reason),
        };
        self.settlement.settle(outcome);
        attempts
    }
}

/// Hands the drive back if a `resolve` call is dropped before settling.
struct DriveGuard<'a> {
    started: &'a AtomicBool,
    settlement: &'a Settlement,
    released: &'a Notify,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        if !self.settlement.is_settled() {
            tracing::debug!("Callback resolution cancelled before settling");
            self.started.store(false, Ordering::SeqCst);
            self.released.notify_waiters();
        }
    }
}

fn preview(token: &str) -> String {
    let head: String = token.chars().take(10).collect();
    format!("{head}... ({} chars)", token.chars().count())
}
