//! Task bookkeeping and the per-task-type start/end/abandon behaviour.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::command::{Command, CommandKey, ProcessEngineCommandContext, ProcessEngineCommandResult};
use crate::hooks::{ProcessTask, find_process_task};

/// Stamps `started` on the current task.
pub struct CommonTaskInitialization;

impl CommandKey for CommonTaskInitialization {
    const KEY: &'static str = "CommonTaskInitialization";
}

#[async_trait]
impl Command for CommonTaskInitialization {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        match ctx.instance.instance_mut().process.current_task.as_mut() {
            Some(task) => {
                task.started.get_or_insert_with(Utc::now);
                ProcessEngineCommandResult::Successful
            }
            None => ProcessEngineCommandResult::failed("instance has no current task"),
        }
    }
}

/// Stamps `ended` on the current task.
pub struct CommonTaskFinalization;

impl CommandKey for CommonTaskFinalization {
    const KEY: &'static str = "CommonTaskFinalization";
}

#[async_trait]
impl Command for CommonTaskFinalization {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
        match ctx.instance.instance_mut().process.current_task.as_mut() {
            Some(task) => {
                task.ended = Some(Utc::now());
                ProcessEngineCommandResult::Successful
            }
            None => ProcessEngineCommandResult::failed("instance has no current task"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Start,
    End,
    Abandon,
}

async fn run_process_task(
    tasks: &[Arc<dyn ProcessTask>],
    phase: Phase,
    ctx: &mut ProcessEngineCommandContext<'_>,
) -> ProcessEngineCommandResult {
    let Some(task_id) = ctx.instance.current_task_id().map(str::to_string) else {
        return ProcessEngineCommandResult::failed("instance has no current task");
    };
    let task_type = ctx.instance.current_task_type().unwrap_or_default().to_string();

    let Some(task) = find_process_task(tasks, &task_type) else {
        debug!(task_id = %task_id, task_type = %task_type, "No process task registered for task type");
        return ProcessEngineCommandResult::Successful;
    };

    let instance = &mut *ctx.instance;
    let outcome = match phase {
        Phase::Start => task.start(instance, &task_id).await,
        Phase::End => task.end(instance, &task_id).await,
        Phase::Abandon => task.abandon(instance, &task_id).await,
    };
    match outcome {
        Ok(()) => ProcessEngineCommandResult::Successful,
        Err(e) => ProcessEngineCommandResult::from_error(
            format!("{phase:?} of '{task_type}' task '{task_id}' failed"),
            &e,
        ),
    }
}

macro_rules! process_task_command {
    ($(#[$doc:meta])* $name:ident, $phase:expr) => {
        $(#[$doc])*
        pub struct $name {
            tasks: Arc<[Arc<dyn ProcessTask>]>,
        }

        impl $name {
            pub fn new(tasks: Arc<[Arc<dyn ProcessTask>]>) -> Self {
                Self { tasks }
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
                run_process_task(&self.tasks, $phase, ctx).await
            }
        }
    };
}

process_task_command!(
    /// Runs the start behaviour of the current task's type.
    WorkflowTaskStart,
    Phase::Start
);
process_task_command!(
    /// Runs the end behaviour of the current task's type.
    WorkflowTaskEnd,
    Phase::End
);
process_task_command!(WorkflowTaskAbandon, Phase::Abandon);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::builtin::test_support::{instance_at_task, instance_ended};
    use crate::instance::InstanceDataMutator;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct DataTask {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl ProcessTask for DataTask {
        fn task_type(&self) -> &str {
            "data"
        }

        async fn start(&self, _instance: &mut dyn InstanceDataMutator, _task_id: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("start");
            Ok(())
        }

        async fn end(&self, _instance: &mut dyn InstanceDataMutator, _task_id: &str) -> anyhow::Result<()> {
            anyhow::bail!("validation errors remain")
        }
    }

    fn tasks(task: Arc<DataTask>) -> Arc<[Arc<dyn ProcessTask>]> {
        let tasks: Vec<Arc<dyn ProcessTask>> = vec![task];
        tasks.into()
    }

    #[tokio::test]
    async fn start_dispatches_on_task_type() {
        let task = Arc::new(DataTask::default());
        let command = WorkflowTaskStart::new(tasks(task.clone()));

        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());
        assert!(command.execute(&mut ctx).await.is_success());
        assert_eq!(*task.calls.lock().unwrap(), vec!["start"]);
    }

    #[tokio::test]
    async fn end_failure_is_reported() {
        let command = WorkflowTaskEnd::new(tasks(Arc::new(DataTask::default())));
        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());

        let result = command.execute(&mut ctx).await;
        let failure = result.failure().unwrap();
        assert_eq!(failure.reason, "End of 'data' task 'Task_1' failed");
        assert_eq!(failure.cause.as_deref(), Some("validation errors remain"));
    }

    #[tokio::test]
    async fn task_type_match_ignores_case() {
        let task = Arc::new(DataTask::default());
        let command = WorkflowTaskStart::new(tasks(task.clone()));

        let mut data = instance_at_task();
        data.instance_mut().process.current_task.as_mut().unwrap().task_type = Some("Data".into());
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());
        assert!(command.execute(&mut ctx).await.is_success());
        assert_eq!(*task.calls.lock().unwrap(), vec!["start"]);
    }

    #[tokio::test]
    async fn unknown_task_type_succeeds() {
        let command = WorkflowTaskAbandon::new(Arc::from(Vec::<Arc<dyn ProcessTask>>::new()));
        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());
        assert!(command.execute(&mut ctx).await.is_success());
    }

    #[tokio::test]
    async fn initialization_and_finalization_stamp_the_task() {
        let mut data = instance_at_task();
        {
            let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());
            assert!(CommonTaskInitialization.execute(&mut ctx).await.is_success());
            assert!(CommonTaskFinalization.execute(&mut ctx).await.is_success());
        }
        let task = data.instance().process.current_task.as_ref().unwrap();
        assert!(task.started.is_some());
        assert!(task.ended.is_some());
    }

    #[tokio::test]
    async fn initialization_needs_a_current_task() {
        let mut data = instance_ended();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());
        assert!(!CommonTaskInitialization.execute(&mut ctx).await.is_success());
    }
}
