use std::time::Duration;

use crate::artifacts::CallbackArtifacts;
use crate::config::ResolverConfig;
use crate::provider::{IdentityProvider, bounded};
use crate::state::{FailureReason, Settlement};
use crate::types::{OtpType, Session};

/// Failure text recorded for an attempt when raw errors are withheld.
pub const GENERIC_FAILURE: &str = "invalid or expired reset link";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionMethod {
    OtpVerify,
    CodeExchange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    Success(Session),
    Failure(String),
}

/// One provider call made while redeeming, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionAttempt {
    pub method: RedemptionMethod,
    pub outcome: RedemptionOutcome,
}

/// Result of a redemption sequence.
#[derive(Debug, Clone, Default)]
pub struct Redemption {
    pub session: Option<Session>,
    pub attempts: Vec<RedemptionAttempt>,
}

impl Redemption {
    /// The session, or [`FailureReason::RedemptionFailed`].
    ///
    /// # Errors
    ///
    /// Fails when no attempt produced a session.
    pub fn into_result(self) -> Result<Session, FailureReason> {
        self.session.ok_or(FailureReason::RedemptionFailed)
    }
}

/// Tries the available redemption methods in a fixed order.
///
/// Every call is isolated: an error or timeout from one method falls through
/// to the next. When a [`Settlement`] is attached, no new attempt starts once
/// it holds a terminal state.
pub struct Redeemer<'a, P> {
    provider: &'a P,
    settlement: Option<&'a Settlement>,
    otp_type: OtpType,
    code_as_token_hash: bool,
    code_verifier: Option<&'a str>,
    timeout: Duration,
    dev_diagnostics: bool,
}

impl<'a, P: IdentityProvider> Redeemer<'a, P> {
    #[must_use]
    pub fn new(provider: &'a P, config: &'a ResolverConfig) -> Self {
        Self {
            provider,
            settlement: None,
            otp_type: config.otp_type,
            code_as_token_hash: config.code_as_token_hash,
            code_verifier: config.code_verifier.as_deref(),
            timeout: config.provider_timeout,
            dev_diagnostics: config.dev_diagnostics,
        }
    }

    #[must_use]
    pub fn with_settlement(mut self, settlement: &'a Settlement) -> Self {
        self.settlement = Some(settlement);
        self
    }

    /// Redeems `artifacts.code`:
    ///
    /// 1. OTP verification with the code as a token hash
    /// 2. PKCE code exchange
    /// 3. OTP verification with `token_hash`, if present with a matching `type`
    pub async fn redeem(&self, artifacts: &CallbackArtifacts) -> Redemption {
        let mut redemption = Redemption::default();

        if let Some(code) = artifacts.code.as_deref() {
            if self.code_as_token_hash
                && self.attempt_otp(code, &mut redemption).await.is_some()
            {
                return redemption;
            }
            if self.attempt_exchange(code, &mut redemption).await.is_some() {
                return redemption;
            }
        }

        if let Some(token_hash) = artifacts.token_hash_for(self.otp_type) {
            self.attempt_otp(token_hash, &mut redemption).await;
        }

        if redemption.session.is_none() {
            tracing::warn!(
                attempts = redemption.attempts.len(),
                "Callback credentials could not be redeemed"
            );
        }
        redemption
    }

    /// Redeems a token hash directly, without touching `code`.
    pub async fn verify_token_hash(&self, token_hash: &str) -> Redemption {
        let mut redemption = Redemption::default();
        self.attempt_otp(token_hash, &mut redemption).await;
        redemption
    }

    async fn attempt_otp(&self, token_hash: &str, redemption: &mut Redemption) -> Option<()> {
        if self.is_settled() {
            return None;
        }
        let result = bounded(
            "verify otp",
            self.timeout,
            self.provider.verify_otp(token_hash, self.otp_type),
        )
        .await;
        self.record(RedemptionMethod::OtpVerify, result, redemption)
    }

    async fn attempt_exchange(&self, code: &str, redemption: &mut Redemption) -> Option<()> {
        if self.is_settled() {
            return None;
        }
        let result = bounded(
            "code exchange",
            self.timeout,
            self.provider
                .exchange_code_for_session(code, self.code_verifier),
        )
        .await;
        self.record(RedemptionMethod::CodeExchange, result, redemption)
    }

    fn record(
        &self,
        method: RedemptionMethod,
        result: Result<Session, crate::Error>,
        redemption: &mut Redemption,
    ) -> Option<()> {
        match result {
            Ok(session) => {
                tracing::debug!(?method, "Redemption succeeded");
                redemption.attempts.push(RedemptionAttempt {
                    method,
                    outcome: RedemptionOutcome::Success(session.clone()),
                });
                redemption.session = Some(session);
                Some(())
            }
            Err(e) => {
                let detail = if self.dev_diagnostics {
                    tracing::warn!(?method, error = %e, "Redemption attempt failed");
                    e.to_string()
                } else {
                    tracing::debug!(?method, "Redemption attempt failed");
                    GENERIC_FAILURE.to_string()
                };
                redemption.attempts.push(RedemptionAttempt {
                    method,
                    outcome: RedemptionOutcome::Failure(detail),
                });
                None
            }
        }
    }

    fn is_settled(&self) -> bool {
        self.settlement.is_some_and(Settlement::is_settled)
    }
}
