#![doc = include_str!("../README.md")]

pub mod artifacts;
pub mod config;
pub mod error;
#[cfg(feature = "client")]
pub mod gotrue;
pub mod listener;
#[cfg(feature = "axum")]
pub mod middleware;
pub mod password;
#[cfg(feature = "client")]
pub mod pkce;
pub mod probe;
pub mod provider;
pub mod rate_limit;
pub mod redeem;
pub mod resolver;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use artifacts::{CallbackArtifacts, CallbackError, strip_consumed};
pub use config::ResolverConfig;
pub use error::Error;
#[cfg(feature = "client")]
pub use gotrue::{GoTrueClient, ProviderConfig};
pub use listener::{ListenerHandle, SessionListener};
pub use password::{PasswordError, is_valid_email, validate_new_password, validate_password};
#[cfg(feature = "client")]
pub use pkce::{PkcePair, code_challenge, generate_code_verifier};
pub use provider::{IdentityProvider, SessionEvents};
pub use rate_limit::{
    MemoryRateLimitStore, RateLimitConfig, RateLimitDecision, RateLimitStore, RateLimiter,
};
pub use redeem::{RedemptionAttempt, RedemptionMethod, RedemptionOutcome};
pub use resolver::{Resolution, SessionResolver};
pub use state::{FailureReason, PageStatus, ProviderErrorKind, SessionState, Settlement};
pub use types::{AuthChangeEvent, AuthStateChange, OtpType, Session, User, UserId};
