use thiserror::Error;

/// Error kinds surfaced by the provider core. Callers branch on the kind;
/// the message is what the dashboard shows the user, so upstream provider
/// messages are passed through verbatim when available.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider credentials (public key or private session) are invalid.
    #[error("{0}")]
    Authentication(String),
    /// A call to the remote provider failed (network or non-2xx).
    #[error("{0}")]
    Upstream(String),
    /// Caller-supplied input is missing or out of bounds.
    #[error("{0}")]
    Validation(String),
    /// A referenced server or provider credential is absent locally.
    #[error("{0}")]
    NotFound(String),
    /// The local record store failed.
    #[error("{0}")]
    Store(String),
}

impl Error {
    pub fn authentication(msg: impl Into<String>) -> Self {
        Error::Authentication(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Error::Upstream(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
