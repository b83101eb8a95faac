//! Password-recovery HTTP routes for Axum.
//!
//! Mounts the recovery mail callback and the JSON endpoints the reset,
//! login and signup forms post to, on top of [`GoTrueClient`](crate::GoTrueClient) and
//! [`SessionResolver`](crate::SessionResolver).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use payroll_accounts::MemoryRateLimitStore;
//! use payroll_accounts::middleware::{AuthRoutesConfig, auth_routes};
//!
//! let config = AuthRoutesConfig::from_env()?;
//! let app = axum::Router::new()
//!     .merge(auth_routes(config, MemoryRateLimitStore::new()));
//! ```
//!
//! | Route | |
//! |---|---|
//! | `GET {auth_path}/callback` | forwards `code` to the reset page as `type=recovery` |
//! | `POST {api_path}/forgot-password` | sends the recovery mail, keeps the PKCE verifier in a cookie |
//! | `POST {api_path}/login` | password sign-in, sets the session cookie |
//! | `POST {api_path}/logout` | signs out the cookie or bearer session; always succeeds |
//! | `GET {api_path}/me` | profile of the signed-in user |
//! | `POST {api_path}/signup` | creates an account (3 per 15 minutes per IP) |
//! | `POST {api_path}/resolve` | resolves the landing URL into a page status |
//! | `POST {api_path}/reset-password` | sets the new password and signs out |

mod config;
mod cookies;
mod error;
mod extractor;
mod routes;
mod state;
mod types;

pub use config::AuthRoutesConfig;
pub use error::AuthError;
pub use extractor::{RecoverySession, SessionToken};
pub use routes::auth_routes;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
