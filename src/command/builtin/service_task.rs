//! Running a service task after the task start has committed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::command::{
    CommandKey, ExecuteServiceTaskPayload, ProcessEngineCommandContext, ProcessEngineCommandResult, TypedCommand,
};
use crate::hooks::{ServiceTask, find_service_task};

/// Executes the service task named in the payload. Registered wrapped in
/// [`Typed`](crate::command::Typed).
pub struct ExecuteServiceTask {
    service_tasks: Arc<[Arc<dyn ServiceTask>]>,
}

impl ExecuteServiceTask {
    pub fn new(service_tasks: Arc<[Arc<dyn ServiceTask>]>) -> Self {
        Self { service_tasks }
    }
}

impl CommandKey for ExecuteServiceTask {
    const KEY: &'static str = "ExecuteServiceTask";
}

#[async_trait]
impl TypedCommand for ExecuteServiceTask {
    type Payload = ExecuteServiceTaskPayload;

    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute_typed(
        &self,
        ctx: &mut ProcessEngineCommandContext<'_>,
        payload: Self::Payload,
    ) -> ProcessEngineCommandResult {
        let task_type = payload.service_task_type;
        let Some(task) = find_service_task(&self.service_tasks, &task_type) else {
            return ProcessEngineCommandResult::failed(format!("no service task registered for type '{task_type}'"));
        };

        match task.execute(&mut *ctx.instance).await {
            Ok(()) => {
                info!(task_type = %task_type, instance = %ctx.instance.identifier(), "Service task completed");
                ProcessEngineCommandResult::Successful
            }
            Err(e) => ProcessEngineCommandResult::from_error(format!("service task '{task_type}' failed"), &e),
        }
    }
}
