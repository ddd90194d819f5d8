//! Error types for OAuth operations

/// Errors from OAuth operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The authorization server rejected the grant (revoked or invalid
    /// refresh token, reused code). Retrying will not help.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Result alias for OAuth operations.
pub type Result<T> = std::result::Result<T, Error>;
