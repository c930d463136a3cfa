//! Error kinds shared across the authentication core.
//!
//! Validation and authorization failures carry caller-visible detail.
//! `Authentication` is intentionally generic: it never distinguishes a wrong
//! password from an unknown email or a locked account, so the login path
//! cannot be used for account enumeration.

use thiserror::Error;

use crate::token;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed or duplicate input. Safe to show field-level detail.
    #[error("{0}")]
    Validation(String),

    /// Bad credentials or locked account. Never carries detail.
    #[error("invalid credentials")]
    Authentication,

    /// Authenticated but not allowed to perform the operation.
    #[error("insufficient permissions")]
    Authorization,

    /// The token's expiry has passed. Callers may refresh.
    #[error("token expired")]
    TokenExpired,

    /// The token could not be parsed. Callers must reject outright.
    #[error("token malformed")]
    TokenMalformed,

    /// The token parsed but failed signature or claim checks.
    #[error("token invalid")]
    TokenInvalid,

    /// Entity absent. Only used for lookups allowed to reveal existence,
    /// never during login.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Wrapped store or hashing failure. The core does not retry.
    #[error("dependency failure: {0}")]
    Dependency(#[from] anyhow::Error),
}

impl AuthError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }
}

impl From<token::Error> for AuthError {
    fn from(err: token::Error) -> Self {
        match err {
            token::Error::Expired => Self::TokenExpired,
            token::Error::TokenFormat
            | token::Error::Base64
            | token::Error::Json(_)
            | token::Error::UnsupportedAlg(_) => Self::TokenMalformed,
            token::Error::InvalidSignature | token::Error::InvalidIssuer | token::Error::Key => {
                Self::TokenInvalid
            }
        }
    }
}
