//! Error types for key selection and dispatch

use provider::UpstreamError;

/// Errors that cross the dispatcher boundary.
///
/// Rate limits never appear here on their own: they are absorbed by cooldown
/// and retry, and only show up as `Exhausted`/`StickyExhausted` once the
/// attempt budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No keys configured at all
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rotating dispatch ran out of attempts or usable keys
    #[error("keys exhausted: {0}")]
    Exhausted(String),

    /// Sticky dispatch spent its whole attempt budget on one key
    #[error("sticky key {credential} exhausted after {attempts} attempts")]
    StickyExhausted { credential: String, attempts: u32 },

    /// Non rate-limit upstream failure, surfaced unchanged
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Uploaded resource reported a failed processing state
    #[error("remote resource {0} failed processing")]
    RemoteFailed(String),

    /// Sticky call issued against a resource that is not active
    #[error("remote resource {0} is not active")]
    NotReady(String),
}

impl Error {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Error::Exhausted(_) | Error::StickyExhausted { .. })
    }
}

/// Result alias for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
