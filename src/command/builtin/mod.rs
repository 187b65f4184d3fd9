//! The built-in commands and the dependencies they are wired with.

pub mod events;
pub mod hooks;
pub mod service_task;
pub mod storage;
pub mod task_data;
pub mod task_lifecycle;

use std::fmt;
use std::sync::Arc;

use crate::command::{CommandRegistry, Typed};
use crate::hooks::{
    EventPublisher, HookSet, InstanceStore, NoopEventPublisher, NoopInstanceStore, NoopTaskEvents, ProcessTask,
    ServiceTask, TaskEvents,
};

/// Collaborators the built-in commands call into.
#[derive(Clone)]
pub struct CommandDependencies {
    pub hooks: HookSet,
    pub task_events: Arc<dyn TaskEvents>,
    pub process_tasks: Vec<Arc<dyn ProcessTask>>,
    pub service_tasks: Vec<Arc<dyn ServiceTask>>,
    pub events: Arc<dyn EventPublisher>,
    pub store: Arc<dyn InstanceStore>,
    /// Delete the instance once its process has ended.
    pub auto_delete_on_process_end: bool,
}

impl Default for CommandDependencies {
    fn default() -> Self {
        Self {
            hooks: HookSet::new(),
            task_events: Arc::new(NoopTaskEvents),
            process_tasks: Vec::new(),
            service_tasks: Vec::new(),
            events: Arc::new(NoopEventPublisher),
            store: Arc::new(NoopInstanceStore),
            auto_delete_on_process_end: false,
        }
    }
}

impl fmt::Debug for CommandDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDependencies")
            .field("hooks", &self.hooks)
            .field("process_tasks", &self.process_tasks.len())
            .field("service_tasks", &self.service_tasks.len())
            .field("auto_delete_on_process_end", &self.auto_delete_on_process_end)
            .finish()
    }
}

impl CommandRegistry {
    /// Registry holding every built-in command.
    pub fn builtin(deps: CommandDependencies) -> Self {
        let hook_set = Arc::new(deps.hooks);
        let process_tasks: Arc<[Arc<dyn ProcessTask>]> = deps.process_tasks.into();
        let service_tasks: Arc<[Arc<dyn ServiceTask>]> = deps.service_tasks.into();

        let mut registry = CommandRegistry::new();
        registry
            .register(task_data::UnlockTaskData)
            .register(task_data::LockTaskData)
            .register(hooks::WorkflowTaskStartLegacyHook::new(deps.task_events.clone()))
            .register(hooks::EndTaskLegacyHook::new(deps.task_events.clone()))
            .register(hooks::AbandonTaskLegacyHook::new(deps.task_events.clone()))
            .register(hooks::WorkflowEndLegacyHook::new(deps.task_events))
            .register(hooks::OnTaskStartingHook::new(hook_set.clone()))
            .register(hooks::OnTaskEndingHook::new(hook_set.clone()))
            .register(hooks::OnTaskAbandonHook::new(hook_set.clone()))
            .register(hooks::OnWorkflowEndingHook::new(hook_set))
            .register(task_lifecycle::CommonTaskInitialization)
            .register(task_lifecycle::CommonTaskFinalization)
            .register(task_lifecycle::WorkflowTaskStart::new(process_tasks.clone()))
            .register(task_lifecycle::WorkflowTaskEnd::new(process_tasks.clone()))
            .register(task_lifecycle::WorkflowTaskAbandon::new(process_tasks))
            .register(storage::UpdateProcessStateInStorage::new(deps.store.clone()))
            .register(storage::DeleteInstance::new(
                deps.store,
                deps.auto_delete_on_process_end,
            ))
            .register(events::MovedToAltinnEvent::new(deps.events.clone()))
            .register(events::InstanceCreatedAltinnEvent::new(deps.events.clone()))
            .register(events::CompletedAltinnEvent::new(deps.events))
            .register(Typed(service_task::ExecuteServiceTask::new(service_tasks)));
        registry
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registers_every_command() {
        let registry = CommandRegistry::builtin(CommandDependencies::default());
        assert_eq!(registry.len(), 21);
        assert!(registry.contains("ExecuteServiceTask"));
        assert!(registry.contains("DeleteInstance"));
    }
}
