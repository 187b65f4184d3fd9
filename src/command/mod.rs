//! Commands: the atomic units of transition logic.
//!
//! A command is a function of (context, payload) to [`ProcessEngineCommandResult`].
//! Commands never propagate errors or panics across the pipeline; everything is
//! converted to [`ProcessEngineCommandResult::Failed`] at the boundary.

pub mod builtin;
pub mod pipeline;
pub mod registry;
pub mod set;
pub mod validator;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::instance::InstanceDataMutator;

pub use pipeline::CommandPipeline;
pub use registry::CommandRegistry;
pub use set::{CommandSetBuilder, TransitionKind, WorkflowCommandSet};
pub use validator::validate_command_registry;

/// Why a command failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailure {
    pub reason: String,
    pub cause: Option<String>,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {cause}", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Outcome of running one command or a whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessEngineCommandResult {
    Successful,
    Failed(CommandFailure),
}

impl ProcessEngineCommandResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(CommandFailure {
            reason: reason.into(),
            cause: None,
        })
    }

    pub fn failed_with(reason: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Failed(CommandFailure {
            reason: reason.into(),
            cause: Some(cause.to_string()),
        })
    }

    /// Convert an internal error into a failure carrying its full chain.
    pub fn from_error(reason: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::failed_with(reason, format!("{err:#}"))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Successful)
    }

    pub fn failure(&self) -> Option<&CommandFailure> {
        match self {
            Self::Successful => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

/// A command request as it appears in a command set or on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CommandRequest {
    pub fn new(command_key: &str) -> Self {
        Self {
            command_key: command_key.to_string(),
            payload: None,
        }
    }

    pub fn with_payload<P: CommandRequestPayload>(command_key: &str, payload: &P) -> serde_json::Result<Self> {
        Ok(Self {
            command_key: command_key.to_string(),
            payload: Some(serde_json::to_value(payload)?),
        })
    }
}

/// Marker for typed payloads attached to a single command request.
pub trait CommandRequestPayload: Serialize + DeserializeOwned + Send + Sync {}

/// Payload for `ExecuteServiceTask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteServiceTaskPayload {
    pub service_task_type: String,
}

impl CommandRequestPayload for ExecuteServiceTaskPayload {}

/// Per-transition state handed to every command.
pub struct ProcessEngineCommandContext<'a> {
    pub instance: &'a mut dyn InstanceDataMutator,
    pub cancellation: CancellationToken,
    /// Payload of the command currently running; set by the pipeline.
    pub payload: Option<serde_json::Value>,
}

impl<'a> ProcessEngineCommandContext<'a> {
    pub fn new(instance: &'a mut dyn InstanceDataMutator, cancellation: CancellationToken) -> Self {
        Self {
            instance,
            cancellation,
            payload: None,
        }
    }

    /// Decode the current payload as `P`.
    pub fn typed_payload<P: CommandRequestPayload>(&self) -> Result<P, String> {
        let value = self.payload.clone().ok_or_else(|| "payload is missing".to_string())?;
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}

/// Stable wire key of a command type.
///
/// Renaming a key is a breaking change: keys are stored in command sets and
/// sent to the remote execution tier.
pub trait CommandKey {
    const KEY: &'static str;
}

#[async_trait]
pub trait Command: Send + Sync {
    fn key(&self) -> &'static str;

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult;
}

/// A command that expects a typed payload.
#[async_trait]
pub trait TypedCommand: Send + Sync {
    type Payload: CommandRequestPayload;

    fn key(&self) -> &'static str;

    async fn execute_typed(
        &self,
        ctx: &mut ProcessEngineCommandContext<'_>,
        payload: Self::Payload,
    ) -> ProcessEngineCommandResult;
}

/// Adapts a [`TypedCommand`] to [`Command`] by decoding the payload first.
///
/// A missing or malformed payload is reported as a normal failure so callers
/// handle it the same way as a business failure.
pub struct Typed<C>(pub C);

impl<C: CommandKey> CommandKey for Typed<C> {
    const KEY: &'static str = C::KEY;
}

#[async_trait]
impl<C: TypedCommand> Command for Typed<C> {
    fn key(&self) -> &'static str {
        self.0.key()
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        match ctx.typed_payload::<C::Payload>() {
            Ok(payload) => self.0.execute_typed(ctx, payload).await,
            Err(e) => ProcessEngineCommandResult::failed_with(
                format!("invalid payload for command '{}'", self.0.key()),
                e,
            ),
        }
    }
}
