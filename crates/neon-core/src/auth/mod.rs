//! Master-side agent authentication
//!
//! - `TokenService` issues and verifies per-server bearer tokens
//! - `RegistrationGuard` checks the shared registration secret

mod guard;
mod token;

pub use guard::{extract_bearer, RegistrationGuard};
pub use token::{
    time_to_expiry, TokenService, VerifiedToken, DEFAULT_ISSUER, DEFAULT_TOKEN_TTL_SECS,
    MAX_TOKEN_TTL_SECS,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signature mismatch")]
    BadSignature,
    #[error("unexpected token issuer: {0}")]
    InvalidIssuer(String),
    #[error("invalid token claims: {0}")]
    InvalidClaims(String),
    #[error("token expired")]
    Expired,
    #[error("token expiry out of range")]
    ExpiryOutOfRange,
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}
