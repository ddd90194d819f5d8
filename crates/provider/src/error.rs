//! Error taxonomy shared by the provider clients and the orchestrator

/// Closed set of error kinds a caller of the translation pipeline can see.
///
/// Match on `kind()` instead of comparing messages; adding a kind is a
/// breaking change on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    /// Lookup failed, or no credential currently has enough quota headroom.
    NotFound,
    SourceCaptionsNotFound,
    Provider,
    Cancelled,
}

impl ErrorKind {
    /// Label for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SourceCaptionsNotFound => "source_captions_not_found",
            ErrorKind::Provider => "provider",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Errors from provider calls and from `Orchestrator::process`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no caption track in source language {0:?}")]
    SourceCaptionsNotFound(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::SourceCaptionsNotFound(_) => ErrorKind::SourceCaptionsNotFound,
            Error::Provider(_) => ErrorKind::Provider,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<crate::caption::CaptionError> for Error {
    fn from(err: crate::caption::CaptionError) -> Self {
        Error::Provider(format!("caption document: {err}"))
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, Error>;
