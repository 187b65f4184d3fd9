//! Locking and unlocking the data elements that belong to the current task.

use async_trait::async_trait;
use tracing::debug;

use crate::command::{Command, CommandKey, ProcessEngineCommandContext, ProcessEngineCommandResult};

fn set_task_data_locked(ctx: &mut ProcessEngineCommandContext<'_>, locked: bool) -> ProcessEngineCommandResult {
    let Some(task_id) = ctx.instance.current_task_id().map(str::to_string) else {
        return ProcessEngineCommandResult::failed("instance has no current task");
    };

    let mut changed = 0;
    for element in ctx.instance.instance_mut().task_data_mut(&task_id) {
        if element.locked != locked {
            element.locked = locked;
            changed += 1;
        }
    }
    debug!(task_id = %task_id, locked, changed, "Updated task data lock flags");
    ProcessEngineCommandResult::Successful
}

/// Opens the current task's data elements for editing.
pub struct UnlockTaskData;

impl CommandKey for UnlockTaskData {
    const KEY: &'static str = "UnlockTaskData";
}

#[async_trait]
impl Command for UnlockTaskData {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        set_task_data_locked(ctx, false)
    }
}

/// Freezes the current task's data elements once the task ends.
pub struct LockTaskData;

impl CommandKey for LockTaskData {
    const KEY: &'static str = "LockTaskData";
}

#[async_trait]
impl Command for LockTaskData {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        set_task_data_locked(ctx, true)
    }
}
