//! Service-specific error types
//!
//! Errors of the account service (credential and session management, the
//! consent flow). Translation runs report `provider::Error` instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("credential store: {0}")]
    Store(#[from] quota_pool::Error),

    #[error("authorization failed: {0}")]
    OAuth(#[from] oauth::Error),

    #[error("translation provider: {0}")]
    Provider(#[from] provider::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
