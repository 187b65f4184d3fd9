use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::{CommandRegistry, CommandRequest, ProcessEngineCommandContext, ProcessEngineCommandResult, WorkflowCommandSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Primary,
    PostCommit,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Primary => "primary",
            Phase::PostCommit => "post-commit",
        }
    }
}

/// Runs command sets sequentially against one instance.
///
/// The first failure wins: remaining primary commands are skipped and the
/// post-commit list never starts. Cancellation and panics inside a command are
/// reported as failures, never propagated.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    registry: Arc<CommandRegistry>,
}

impl CommandPipeline {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub async fn execute(
        &self,
        set: &WorkflowCommandSet,
        ctx: &mut ProcessEngineCommandContext<'_>,
    ) -> ProcessEngineCommandResult {
        let result = self.run_phase(Phase::Primary, &set.commands, ctx).await;
        if !result.is_success() {
            return result;
        }
        self.run_phase(Phase::PostCommit, &set.post_commit, ctx).await
    }

    async fn run_phase(
        &self,
        phase: Phase,
        requests: &[CommandRequest],
        ctx: &mut ProcessEngineCommandContext<'_>,
    ) -> ProcessEngineCommandResult {
        for request in requests {
            let result = self.run_one(phase, request, ctx).await;
            if let ProcessEngineCommandResult::Failed(failure) = &result {
                warn!(
                    command = %request.command_key,
                    phase = phase.as_str(),
                    reason = %failure,
                    "Command failed, aborting pipeline"
                );
                return result;
            }
        }
        ProcessEngineCommandResult::Successful
    }

    async fn run_one(
        &self,
        phase: Phase,
        request: &CommandRequest,
        ctx: &mut ProcessEngineCommandContext<'_>,
    ) -> ProcessEngineCommandResult {
        let key = request.command_key.as_str();
        let Some(command) = self.registry.get(key) else {
            return ProcessEngineCommandResult::failed(format!("no command registered for key '{key}'"));
        };

        let cancellation = ctx.cancellation.clone();
        if cancellation.is_cancelled() {
            return ProcessEngineCommandResult::failed("operation cancelled");
        }

        ctx.payload = request.payload.clone();
        let started = Instant::now();
        debug!(command = key, phase = phase.as_str(), "Executing command");

        let run = AssertUnwindSafe(command.execute(ctx)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                info!(command = key, "Cancelled while command was running");
                return ProcessEngineCommandResult::failed("operation cancelled");
            }
            outcome = run => outcome,
        };
        ctx.payload = None;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                debug!(
                    command = key,
                    phase = phase.as_str(),
                    elapsed_ms,
                    success = result.is_success(),
                    "Command finished"
                );
                result
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(command = key, elapsed_ms, panic = %message, "Command panicked");
                ProcessEngineCommandResult::failed_with(format!("command '{key}' panicked"), message)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::builtin::test_support::instance_at_task;
    use crate::command::{Command, CommandKey, CommandSetBuilder, TransitionKind};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Hang,
    }

    struct Scripted<const N: usize> {
        log: Log,
        behaviour: Behaviour,
    }

    macro_rules! scripted_key {
        ($n:literal, $key:literal) => {
            impl CommandKey for Scripted<$n> {
                const KEY: &'static str = $key;
            }
        };
    }

    scripted_key!(0, "A");
    scripted_key!(1, "B");
    scripted_key!(2, "C");
    scripted_key!(3, "Post");

    #[async_trait]
    impl<const N: usize> Command for Scripted<N>
    where
        Scripted<N>: CommandKey,
    {
        fn key(&self) -> &'static str {
            <Self as CommandKey>::KEY
        }

        async fn execute(&self, _ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
            self.log.lock().unwrap().push(<Self as CommandKey>::KEY);
            match self.behaviour {
                Behaviour::Succeed => ProcessEngineCommandResult::Successful,
                Behaviour::Fail => ProcessEngineCommandResult::failed(format!("{} failed", <Self as CommandKey>::KEY)),
                Behaviour::Panic => panic!("boom"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    ProcessEngineCommandResult::Successful
                }
            }
        }
    }

    fn scripted<const N: usize>(log: &Log, behaviour: Behaviour) -> Scripted<N> {
        Scripted {
            log: log.clone(),
            behaviour,
        }
    }

    fn set(primary: &[&str], post: &[&str]) -> WorkflowCommandSet {
        WorkflowCommandSet {
            commands: primary.iter().map(|k| CommandRequest::new(k)).collect(),
            post_commit: post.iter().map(|k| CommandRequest::new(k)).collect(),
        }
    }

    fn pipeline(log: &Log, b: Behaviour) -> CommandPipeline {
        let registry = CommandRegistry::new()
            .with(scripted::<0>(log, Behaviour::Succeed))
            .with(scripted::<1>(log, b))
            .with(scripted::<2>(log, Behaviour::Succeed))
            .with(scripted::<3>(log, Behaviour::Succeed));
        CommandPipeline::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn all_succeed_runs_primary_then_post_commit() {
        let log = Log::default();
        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());

        let result = pipeline(&log, Behaviour::Succeed)
            .execute(&set(&["A", "B", "C"], &["Post"]), &mut ctx)
            .await;

        assert!(result.is_success());
        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C", "Post"]);
    }

    #[tokio::test]
    async fn failure_short_circuits_and_skips_post_commit() {
        let log = Log::default();
        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());

        let result = pipeline(&log, Behaviour::Fail)
            .execute(&set(&["A", "B", "C"], &["Post"]), &mut ctx)
            .await;

        assert_eq!(result.failure().unwrap().reason, "B failed");
        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn unregistered_key_fails() {
        let log = Log::default();
        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());

        let result = pipeline(&log, Behaviour::Succeed)
            .execute(&set(&["A", "Missing", "C"], &[]), &mut ctx)
            .await;

        assert_eq!(
            result.failure().unwrap().reason,
            "no command registered for key 'Missing'"
        );
        assert_eq!(*log.lock().unwrap(), vec!["A"]);
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let log = Log::default();
        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());

        let result = pipeline(&log, Behaviour::Panic)
            .execute(&set(&["A", "B", "C"], &[]), &mut ctx)
            .await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.reason, "command 'B' panicked");
        assert_eq!(failure.cause.as_deref(), Some("boom"));
        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let log = Log::default();
        let mut data = instance_at_task();
        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, token);

        let result = pipeline(&log, Behaviour::Succeed)
            .execute(&set(&["A"], &["Post"]), &mut ctx)
            .await;

        assert_eq!(result.failure().unwrap().reason, "operation cancelled");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_running_command() {
        let log = Log::default();
        let mut data = instance_at_task();
        let token = CancellationToken::new();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = pipeline(&log, Behaviour::Hang)
            .execute(&set(&["A", "B", "C"], &[]), &mut ctx)
            .await;
        canceller.await.unwrap();

        assert_eq!(result.failure().unwrap().reason, "operation cancelled");
        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn empty_set_succeeds() {
        let log = Log::default();
        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());

        let result = pipeline(&log, Behaviour::Succeed)
            .execute(&WorkflowCommandSet::default(), &mut ctx)
            .await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn payload_is_visible_only_to_its_command() {
        struct Inspect(Arc<Mutex<Vec<Option<serde_json::Value>>>>);

        impl CommandKey for Inspect {
            const KEY: &'static str = "Inspect";
        }

        #[async_trait]
        impl Command for Inspect {
            fn key(&self) -> &'static str {
                Self::KEY
            }

            async fn execute(&self, ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
                self.0.lock().unwrap().push(ctx.payload.clone());
                ProcessEngineCommandResult::Successful
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = CommandRegistry::new().with(Inspect(seen.clone()));
        let mut with_payload = CommandRequest::new("Inspect");
        with_payload.payload = Some(serde_json::json!({ "serviceTaskType": "pdf" }));
        let set = WorkflowCommandSet {
            commands: vec![with_payload, CommandRequest::new("Inspect")],
            post_commit: vec![],
        };

        let mut data = instance_at_task();
        let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());
        let result = CommandPipeline::new(Arc::new(registry)).execute(&set, &mut ctx).await;

        assert!(result.is_success());
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].as_ref().unwrap()["serviceTaskType"], "pdf");
        assert!(seen[1].is_none());
    }

    #[tokio::test]
    async fn builtin_task_end_runs_against_default_dependencies() {
        use crate::command::builtin::CommandDependencies;
        use crate::instance::InstanceDataMutator;

        let registry = CommandRegistry::builtin(CommandDependencies::default());
        let set = CommandSetBuilder::build(TransitionKind::TaskEnd, None, false);

        let mut data = instance_at_task();
        {
            let mut ctx = ProcessEngineCommandContext::new(&mut data, CancellationToken::new());
            let result = CommandPipeline::new(Arc::new(registry)).execute(&set, &mut ctx).await;
            assert!(result.is_success(), "{result:?}");
        }
        assert!(data.instance().data[0].locked);
        assert!(data.instance().process.current_task.as_ref().unwrap().ended.is_some());
    }
}
