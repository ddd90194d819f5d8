//! Error types for store and broker operations

use crate::model::PoolKind;

/// Errors from store and broker operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No eligible credential has `cost` units of quota left.
    #[error("no {pool} credential has {cost} units of quota left")]
    QuotaExhausted { pool: PoolKind, cost: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("store file is corrupt: {0}")]
    Parse(String),
}

/// Result alias for store and broker operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for provider::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::QuotaExhausted { .. } | Error::NotFound(_) => {
                provider::Error::NotFound(err.to_string())
            }
            Error::InvalidInput(msg) => provider::Error::InvalidInput(msg),
            Error::Io(_) | Error::Parse(_) => provider::Error::Provider(err.to_string()),
        }
    }
}
