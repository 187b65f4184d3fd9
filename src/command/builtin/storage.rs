//! Persisting and deleting the instance.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{Command, CommandKey, ProcessEngineCommandContext, ProcessEngineCommandResult};
use crate::hooks::InstanceStore;

/// Writes the mutated instance to storage. This is the commit point of a
/// transition: it heads every post-commit list.
pub struct UpdateProcessStateInStorage {
    store: Arc<dyn InstanceStore>,
}

impl UpdateProcessStateInStorage {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }
}

impl CommandKey for UpdateProcessStateInStorage {
    const KEY: &'static str = "UpdateProcessStateInStorage";
}

#[async_trait]
impl Command for UpdateProcessStateInStorage {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        let instance = ctx.instance.instance();
        match self.store.update_process_state(instance).await {
            Ok(()) => {
                debug!(
                    instance = %instance.identifier,
                    task = ?instance.process.current_task_id(),
                    "Persisted process state"
                );
                ProcessEngineCommandResult::Successful
            }
            Err(e) => ProcessEngineCommandResult::from_error("failed to persist process state", &e),
        }
    }
}

/// Deletes the instance after its process ended, when the app asked for it.
pub struct DeleteInstance {
    store: Arc<dyn InstanceStore>,
    enabled: bool,
}

impl DeleteInstance {
    pub fn new(store: Arc<dyn InstanceStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }
}

impl CommandKey for DeleteInstance {
    const KEY: &'static str = "DeleteInstance";
}

#[async_trait]
impl Command for DeleteInstance {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        if !self.enabled {
            return ProcessEngineCommandResult::Successful;
        }
        let identifier = ctx.instance.identifier();
        match self.store.delete_instance(identifier).await {
            Ok(()) => {
                info!(instance = %identifier, "Deleted instance after process end");
                ProcessEngineCommandResult::Successful
            }
            Err(e) => ProcessEngineCommandResult::from_error(format!("failed to delete instance {identifier}"), &e),
        }
    }
}
