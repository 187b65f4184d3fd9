//! Commands that call into app code: the legacy task events and the
//! per-lifecycle-point hooks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{Command, CommandKey, ProcessEngineCommandContext, ProcessEngineCommandResult};
use crate::hooks::{HookKind, HookSet, TaskEvents};

fn current_task(ctx: &ProcessEngineCommandContext<'_>) -> Result<String, ProcessEngineCommandResult> {
    ctx.instance
        .current_task_id()
        .map(str::to_string)
        .ok_or_else(|| ProcessEngineCommandResult::failed("instance has no current task"))
}

macro_rules! legacy_task_hook {
    ($(#[$doc:meta])* $name:ident, $method:ident) => {
        $(#[$doc])*
        pub struct $name {
            events: Arc<dyn TaskEvents>,
        }

        impl $name {
            pub fn new(events: Arc<dyn TaskEvents>) -> Self {
                Self { events }
            }
        }

        impl CommandKey for $name {
            const KEY: &'static str = stringify!($name);
        }

        #[async_trait]
        impl Command for $name {
            fn key(&self) -> &'static str {
                Self::KEY
            }

            async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
                let task_id = match current_task(ctx) {
                    Ok(task_id) => task_id,
                    Err(failed) => return failed,
                };
                match self.events.$method(&mut *ctx.instance, &task_id).await {
                    Ok(()) => ProcessEngineCommandResult::Successful,
                    Err(e) => ProcessEngineCommandResult::from_error(
                        format!("{} failed for task '{task_id}'", Self::KEY),
                        &e,
                    ),
                }
            }
        }
    };
}

legacy_task_hook!(
    /// Legacy `on_start_task` event.
    WorkflowTaskStartLegacyHook,
    on_start_task
);
legacy_task_hook!(EndTaskLegacyHook, on_end_task);
legacy_task_hook!(AbandonTaskLegacyHook, on_abandon_task);

/// Legacy `on_end_process` event. Runs after the process state has moved to
/// ended, so there is no current task to pass.
pub struct WorkflowEndLegacyHook {
    events: Arc<dyn TaskEvents>,
}

impl WorkflowEndLegacyHook {
    pub fn new(events: Arc<dyn TaskEvents>) -> Self {
        Self { events }
    }
}

impl CommandKey for WorkflowEndLegacyHook {
    const KEY: &'static str = "WorkflowEndLegacyHook";
}

#[async_trait]
impl Command for WorkflowEndLegacyHook {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        match self.events.on_end_process(&mut *ctx.instance).await {
            Ok(()) => ProcessEngineCommandResult::Successful,
            Err(e) => ProcessEngineCommandResult::from_error("WorkflowEndLegacyHook failed", &e),
        }
    }
}

// Hooks at points that allow many run them all, in registration order.
async fn run_all(
    hooks: &HookSet,
    kind: HookKind,
    ctx: &mut ProcessEngineCommandContext<'_>,
) -> ProcessEngineCommandResult {
    let task_id = match current_task(ctx) {
        Ok(task_id) => task_id,
        Err(failed) => return failed,
    };
    let matching = hooks.matching(kind, &task_id);
    debug!(%kind, task_id = %task_id, count = matching.len(), "Running hooks");
    for hook in matching {
        if let Err(e) = hook.run(&mut *ctx.instance, &task_id).await {
            return ProcessEngineCommandResult::from_error(format!("{kind} hook failed for task '{task_id}'"), &e);
        }
    }
    ProcessEngineCommandResult::Successful
}

async fn run_single(
    hooks: &HookSet,
    kind: HookKind,
    task_id: &str,
    ctx: &mut ProcessEngineCommandContext<'_>,
) -> ProcessEngineCommandResult {
    let hook = match hooks.resolve_single(kind, task_id) {
        Ok(Some(hook)) => hook,
        Ok(None) => return ProcessEngineCommandResult::Successful,
        Err(e) => return ProcessEngineCommandResult::failed(e.to_string()),
    };
    debug!(%kind, task_id, "Running hook");
    match hook.run(&mut *ctx.instance, task_id).await {
        Ok(()) => ProcessEngineCommandResult::Successful,
        Err(e) => ProcessEngineCommandResult::from_error(format!("{kind} hook failed for task '{task_id}'"), &e),
    }
}

/// Runs every task-starting hook for the current task.
pub struct OnTaskStartingHook {
    hooks: Arc<HookSet>,
}

impl OnTaskStartingHook {
    pub fn new(hooks: Arc<HookSet>) -> Self {
        Self { hooks }
    }
}

impl CommandKey for OnTaskStartingHook {
    const KEY: &'static str = "OnTaskStartingHook";
}

#[async_trait]
impl Command for OnTaskStartingHook {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        run_all(&self.hooks, HookKind::TaskStarting, ctx).await
    }
}

/// Runs every task-abandon hook for the current task.
pub struct OnTaskAbandonHook {
    hooks: Arc<HookSet>,
}

impl OnTaskAbandonHook {
    pub fn new(hooks: Arc<HookSet>) -> Self {
        Self { hooks }
    }
}

impl CommandKey for OnTaskAbandonHook {
    const KEY: &'static str = "OnTaskAbandonHook";
}

#[async_trait]
impl Command for OnTaskAbandonHook {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        run_all(&self.hooks, HookKind::TaskAbandon, ctx).await
    }
}

/// Runs the task-ending hook for the current task, if one is registered.
pub struct OnTaskEndingHook {
    hooks: Arc<HookSet>,
}

impl OnTaskEndingHook {
    pub fn new(hooks: Arc<HookSet>) -> Self {
        Self { hooks }
    }
}

impl CommandKey for OnTaskEndingHook {
    const KEY: &'static str = "OnTaskEndingHook";
}

#[async_trait]
impl Command for OnTaskEndingHook {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        let task_id = match current_task(ctx) {
            Ok(task_id) => task_id,
            Err(failed) => return failed,
        };
        run_single(&self.hooks, HookKind::TaskEnding, &task_id, ctx).await
    }
}

/// Runs the process-ending hook, if one is registered.
///
/// The process has no current task by now, so only hooks bound to every task
/// can match.
pub struct OnWorkflowEndingHook {
    hooks: Arc<HookSet>,
}

impl OnWorkflowEndingHook {
    pub fn new(hooks: Arc<HookSet>) -> Self {
        Self { hooks }
    }
}

impl CommandKey for OnWorkflowEndingHook {
    const KEY: &'static str = "OnWorkflowEndingHook";
}

#[async_trait]
impl Command for OnWorkflowEndingHook {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        let task_id = ctx.instance.current_task_id().unwrap_or_default().to_string();
        run_single(&self.hooks, HookKind::ProcessEnding, &task_id, ctx).await
    }
}
