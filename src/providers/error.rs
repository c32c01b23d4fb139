//! Error kinds shared by all provider adapters.

/// Errors surfaced by provider operations.
///
/// Transport errors are retried inside the provider; only bounded-retry
/// exhaustion escapes as [`ProviderError::Transport`]. Send rejections never
/// appear here; they are shaped into a failed
/// [`SendResult`](crate::providers::SendResult) instead.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Invalid or missing configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication failure (expired session, invalid code or password).
    #[error("authentication error: {0}")]
    Auth(String),

    /// Transport failure after bounded retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// An entity or mapping could not be resolved.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cancellation was observed; a graceful unwind, not a fault.
    #[error("cancelled")]
    Cancelled,

    /// A precondition was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}
