use std::time::Duration;

use crate::types::OtpType;

/// Tuning for [`SessionResolver`](crate::SessionResolver).
///
/// Defaults follow the provider's observed timing: a fragment-borne session
/// usually shows up within a few hundred milliseconds of page load.
///
/// ```rust,ignore
/// let config = ResolverConfig::default()
///     .with_otp_type(OtpType::EmailChange)
///     .with_provider_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ResolverConfig {
    pub(crate) probe_attempts: u32,
    pub(crate) probe_delay: Duration,
    pub(crate) grace_period: Duration,
    pub(crate) provider_timeout: Duration,
    pub(crate) otp_type: OtpType,
    pub(crate) code_as_token_hash: bool,
    pub(crate) code_verifier: Option<String>,
    pub(crate) dev_diagnostics: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            probe_attempts: 2,
            probe_delay: Duration::from_millis(300),
            grace_period: Duration::from_millis(1500),
            provider_timeout: Duration::from_secs(10),
            otp_type: OtpType::Recovery,
            code_as_token_hash: true,
            code_verifier: None,
            dev_diagnostics: false,
        }
    }
}

impl ResolverConfig {
    /// Number of session probes per probe round. Values below 2 are raised to 2.
    #[must_use]
    pub fn with_probe_attempts(mut self, attempts: u32) -> Self {
        self.probe_attempts = attempts.max(2);
        self
    }

    /// Delay between consecutive probes (default 300 ms).
    #[must_use]
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// Wait before the final re-probe when the URL carried nothing (default 1.5 s).
    #[must_use]
    pub fn with_grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    /// Upper bound for each identity-provider call (default 10 s).
    #[must_use]
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// OTP type assumed for token-hash redemption (default `recovery`).
    #[must_use]
    pub fn with_otp_type(mut self, otp_type: OtpType) -> Self {
        self.otp_type = otp_type;
        self
    }

    /// Whether `code` is first tried as an OTP token hash (default `true`).
    ///
    /// Disable for providers that only ever put PKCE codes in `code`.
    #[must_use]
    pub fn with_code_as_token_hash(mut self, enabled: bool) -> Self {
        self.code_as_token_hash = enabled;
        self
    }

    /// PKCE verifier saved when the reset mail was requested.
    #[must_use]
    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    /// Log raw provider errors (development only).
    #[must_use]
    pub fn with_dev_diagnostics(mut self, enabled: bool) -> Self {
        self.dev_diagnostics = enabled;
        self
    }

    #[must_use]
    pub fn probe_attempts(&self) -> u32 {
        self.probe_attempts
    }

    #[must_use]
    pub fn probe_delay(&self) -> Duration {
        self.probe_delay
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    #[must_use]
    pub fn otp_type(&self) -> OtpType {
        self.otp_type
    }
}
