use thiserror::Error;

pub type Result<T> = std::result::Result<T, DouyuError>;

/// Errors surfaced by the platform client.
#[derive(Debug, Error)]
pub enum DouyuError {
    /// Transport-level failure (DNS, connect, timeout, TLS).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The platform answered, but not with what the protocol promises
    /// (malformed JSON, non-zero app-level error code, missing fields).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Signed request was rejected even after refreshing the key bundle.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl DouyuError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }
}
