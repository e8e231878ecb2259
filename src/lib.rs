//! An external authorization service for OpenID Connect.
//!
//! An upstream proxy delegates per-request authorization decisions to this
//! service. For each check the service decides whether the request may
//! proceed (injecting the session's tokens as headers), must be redirected to
//! the identity provider to begin the Authorization Code flow, or must be
//! denied.
//!
//! # How it works
//!
//! 1. An unauthenticated request arrives; the check is denied with a `302`
//!    to the provider's authorization endpoint and an encrypted state cookie
//!    binding a fresh `state`/`nonce` pair to the browser.
//! 2. The user authenticates and the provider redirects to the configured
//!    callback with an authorization code.
//! 3. The callback check validates the state binding, exchanges the code at
//!    the token endpoint, verifies the ID token (signature, audience, expiry,
//!    nonce) and answers with a `302` to the landing page carrying the new
//!    encrypted session cookies.
//! 4. Subsequent checks decrypt the session cookies and are allowed, with
//!    the tokens injected into configurable request headers.
//!
//! # Session model
//!
//! Sessions are stateless and cookie-based: the tokens are AES-256-GCM
//! encrypted into `__Host-` cookies and nothing is kept on the server between
//! checks. Validation failures are fail-closed; any tampered or foreign
//! cookie simply restarts authentication.

pub mod check;
pub mod config;
pub mod cookies;
pub mod crypto;
pub mod error;
pub mod filter;
pub mod http;
pub mod jwks;
pub mod oidc;
pub mod server;
pub mod token_response;

pub use check::{CheckDecision, CheckRequest, DeniedStatus, HeaderDirective};
pub use config::Settings;
pub use error::AuthError;
pub use filter::{Filter, FilterChain, OidcFilterChain, select_chain};

pub(crate) fn now_unix() -> i64 {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
