use thiserror::Error;

use crate::hooks::HookKind;
use crate::lock::LockError;
use crate::remote::RemoteEngineError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unable to determine instance identity from the request context")]
    InstanceIdentity,

    #[error(
        "Process engine configuration error: the following command keys are referenced but not registered: {}",
        quoted_list(.keys)
    )]
    MissingCommands { keys: Vec<String> },

    #[error("{count} {kind} handlers registered for task '{task_id}', expected at most one")]
    MultipleHandlers {
        kind: HookKind,
        task_id: String,
        count: usize,
    },

    #[error("Instance {0} has no current task")]
    NoCurrentTask(String),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Remote engine error: {0}")]
    RemoteEngine(#[from] RemoteEngineError),

    #[error("Process engine job {status}")]
    EngineJob { status: String },

    #[error("Timed out after {0:?} waiting for the process engine job to complete")]
    EngineTimeout(std::time::Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

fn quoted_list(keys: &[String]) -> String {
    keys.iter()
        .map(|k| format!("'{k}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Broad classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Wiring or input is wrong; retrying cannot help.
    Structural,
    /// A command reported a failure of its own logic.
    Business,
    /// Network or remote-tier failure; retry with backoff.
    Transient,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Structural => write!(f, "Structural"),
            ErrorClass::Business => write!(f, "Business"),
            ErrorClass::Transient => write!(f, "Transient"),
        }
    }
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Config(_)
            | EngineError::InstanceIdentity
            | EngineError::MissingCommands { .. }
            | EngineError::MultipleHandlers { .. }
            | EngineError::NoCurrentTask(_)
            | EngineError::Json(_)
            | EngineError::Toml(_) => ErrorClass::Structural,
            EngineError::EngineJob { .. } => ErrorClass::Business,
            EngineError::Lock(_)
            | EngineError::RemoteEngine(_)
            | EngineError::EngineTimeout(_)
            | EngineError::Cancelled
            | EngineError::Io(_) => ErrorClass::Transient,
        }
    }
}
