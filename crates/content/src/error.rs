use thiserror::Error;

/// Errors from content generation.
#[derive(Debug, Error)]
pub enum Error {
    /// The dispatcher gave up: configuration, exhaustion, or a fatal upstream error
    #[error(transparent)]
    Dispatch(#[from] key_pool::Error),

    /// The model's output could not be read for an endpoint that needs it
    #[error("unreadable {0} response")]
    Parse(String),
}

impl Error {
    /// True when retrying later may succeed (keys exhausted).
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Self::Dispatch(e) if e.is_retryable_later())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
