use thiserror::Error;

/// Failures talking to the lock endpoints.
#[derive(Debug, Error)]
pub enum LockError {
    /// Someone else holds the lock. Callers get this instead of blocking.
    #[error("instance is locked by another holder: {message}")]
    Conflict { message: String },

    #[error("lock API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected lock response: {0}")]
    UnexpectedResponse(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
