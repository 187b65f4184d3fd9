use thiserror::Error;

/// Failures talking to the remote process engine.
#[derive(Debug, Error)]
pub enum RemoteEngineError {
    /// Any non-success status other than "no active job".
    #[error("process engine API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("could not parse process engine response: {0}")]
    Parse(#[from] serde_json::Error),
}
