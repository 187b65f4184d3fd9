//! Drives one lifecycle transition of an instance end to end.
//!
//! Local mode runs the command sets in-process under the instance lock.
//! Remote mode hands the same command sets to the process engine tier and
//! polls until the job settles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::builtin::CommandDependencies;
use crate::command::{
    CommandPipeline, CommandRegistry, CommandSetBuilder, ProcessEngineCommandContext, ProcessEngineCommandResult,
    TransitionKind, WorkflowCommandSet, validate_command_registry,
};
use crate::error::{EngineError, Result};
use crate::hooks::{HookKind, HookSet, ServiceTask, find_service_task};
use crate::instance::{Instance, InstanceDataMutator, InstanceIdentifier, ProcessState, TaskInfo};
use crate::lock::{DEFAULT_LOCK_TTL, InstanceLocker, LockClient, RequestContext};
use crate::remote::job::ProcessEngineItemStatus;
use crate::remote::{ProcessEngineActor, ProcessEngineClient, ProcessNextRequestFactory};
use crate::retry::RetryStrategy;

/// One lifecycle event inside a state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEvent {
    pub kind: TransitionKind,
    /// Task the event concerns; `None` for the process end.
    pub task: Option<TaskInfo>,
}

/// A move from one process state to the next and the events it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStateChange {
    pub old_state: ProcessState,
    pub new_state: ProcessState,
    pub events: Vec<ProcessEvent>,
}

impl ProcessStateChange {
    /// Start a fresh process at `first`.
    pub fn start(first: TaskInfo) -> Self {
        Self {
            old_state: ProcessState::default(),
            new_state: ProcessState::at_task(first.clone()),
            events: vec![ProcessEvent {
                kind: TransitionKind::TaskStart,
                task: Some(first),
            }],
        }
    }

    /// End the current task and start `next`.
    pub fn move_to(current: &ProcessState, next: TaskInfo) -> Result<Self> {
        let ending = Self::current_task(current)?;
        let mut new_state = ProcessState::at_task(next.clone());
        new_state.started = current.started.or(new_state.started);
        Ok(Self {
            old_state: current.clone(),
            new_state,
            events: vec![
                ProcessEvent {
                    kind: TransitionKind::TaskEnd,
                    task: Some(ending),
                },
                ProcessEvent {
                    kind: TransitionKind::TaskStart,
                    task: Some(next),
                },
            ],
        })
    }

    /// Abandon the current task and start `next` instead.
    pub fn abandon(current: &ProcessState, next: TaskInfo) -> Result<Self> {
        let mut change = Self::move_to(current, next)?;
        change.events[0].kind = TransitionKind::TaskAbandon;
        Ok(change)
    }

    /// End the current task and then the process.
    pub fn end(current: &ProcessState) -> Result<Self> {
        let ending = Self::current_task(current)?;
        let mut new_state = ProcessState::ended();
        new_state.started = current.started;
        Ok(Self {
            old_state: current.clone(),
            new_state,
            events: vec![
                ProcessEvent {
                    kind: TransitionKind::TaskEnd,
                    task: Some(ending),
                },
                ProcessEvent {
                    kind: TransitionKind::ProcessEnd,
                    task: None,
                },
            ],
        })
    }

    fn current_task(state: &ProcessState) -> Result<TaskInfo> {
        state
            .current_task
            .clone()
            .ok_or_else(|| EngineError::NoCurrentTask("process state".to_string()))
    }
}

/// The command set resolved for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSet {
    pub event: ProcessEvent,
    pub set: WorkflowCommandSet,
}

/// Resolve the command set of every event in `change`, in order.
///
/// A task start runs its service task only when one is registered for the
/// task's type.
pub fn plan_transition(change: &ProcessStateChange, service_tasks: &[Arc<dyn ServiceTask>]) -> Vec<PlannedSet> {
    let is_initial = change.old_state.current_task.is_none();
    change
        .events
        .iter()
        .map(|event| {
            let service_task_type = event
                .task
                .as_ref()
                .and_then(|t| t.task_type.as_deref())
                .filter(|t| find_service_task(service_tasks, t).is_some());
            PlannedSet {
                event: event.clone(),
                set: CommandSetBuilder::build(event.kind, service_task_type, is_initial),
            }
        })
        .collect()
}

/// How remote job status is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub strategy: RetryStrategy,
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::exponential(Duration::from_millis(200)).with_max_delay(Duration::from_secs(2)),
            timeout: Duration::from_secs(100),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Poll the active job until it completes, fails, or time runs out.
///
/// No active job counts as done.
pub async fn wait_for_engine_response<C: ProcessEngineClient>(
    client: &C,
    instance: InstanceIdentifier,
    settings: &PollSettings,
    cancellation: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    let mut iteration = 1u32;

    loop {
        let status = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(EngineError::Cancelled),
            status = client.get_active_job_status(instance) => status?,
        };

        let Some(status) = status else {
            debug!(%instance, "No active process engine job");
            return Ok(());
        };

        match status.overall_status {
            ProcessEngineItemStatus::Completed => return Ok(()),
            ProcessEngineItemStatus::Failed | ProcessEngineItemStatus::Canceled => {
                return Err(EngineError::EngineJob {
                    status: status.overall_status.to_string(),
                });
            }
            ProcessEngineItemStatus::Enqueued
            | ProcessEngineItemStatus::Processing
            | ProcessEngineItemStatus::Requeued => {
                let current = status.current_task();
                debug!(
                    %instance,
                    status = %status.overall_status,
                    remaining = status.ordered_incomplete_tasks().len(),
                    task = current.map(|t| t.command_key.as_str()),
                    requeue_count = current.map(|t| t.requeue_count),
                    "Process engine job still in progress"
                );
            }
        }

        if started.elapsed() > settings.timeout {
            return Err(EngineError::EngineTimeout(settings.timeout));
        }

        let delay = settings.strategy.calculate_delay(iteration);
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        iteration = iteration.saturating_add(1);
    }
}

/// Runs transitions for instances: lock, plan, validate, execute, release.
pub struct ProcessEngine {
    pipeline: CommandPipeline,
    hooks: HookSet,
    service_tasks: Vec<Arc<dyn ServiceTask>>,
    lock_client: Arc<dyn LockClient>,
    lock_ttl: Duration,
    poll: PollSettings,
}

impl ProcessEngine {
    /// Engine over the built-in commands wired with `deps`.
    pub fn new(deps: CommandDependencies, lock_client: Arc<dyn LockClient>) -> Result<Self> {
        let hooks = deps.hooks.clone();
        let service_tasks = deps.service_tasks.clone();
        Self::with_registry(CommandRegistry::builtin(deps), hooks, service_tasks, lock_client)
    }

    /// Engine over a custom registry. Fails if the registry cannot serve
    /// every transition.
    pub fn with_registry(
        registry: CommandRegistry,
        hooks: HookSet,
        service_tasks: Vec<Arc<dyn ServiceTask>>,
        lock_client: Arc<dyn LockClient>,
    ) -> Result<Self> {
        validate_command_registry(&registry)?;
        Ok(Self {
            pipeline: CommandPipeline::new(Arc::new(registry)),
            hooks,
            service_tasks,
            lock_client,
            lock_ttl: DEFAULT_LOCK_TTL,
            poll: PollSettings::default(),
        })
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    pub fn poll_settings(&self) -> &PollSettings {
        &self.poll
    }

    pub fn plan(&self, change: &ProcessStateChange) -> Vec<PlannedSet> {
        plan_transition(change, &self.service_tasks)
    }

    /// Run `change` in-process against `instance`.
    ///
    /// Structural and lock problems are errors. A command failure is returned
    /// as `Ok(Failed)`. The lock is released on every path once acquired.
    pub async fn run_transition(
        &self,
        request: &RequestContext,
        instance: &mut dyn InstanceDataMutator,
        change: &ProcessStateChange,
        cancellation: CancellationToken,
    ) -> Result<ProcessEngineCommandResult> {
        let mut locker = self.locker(request);
        locker.lock().await?;

        let outcome = self.execute_locked(instance, change, cancellation).await;
        locker.release().await;
        outcome
    }

    async fn execute_locked(
        &self,
        instance: &mut dyn InstanceDataMutator,
        change: &ProcessStateChange,
        cancellation: CancellationToken,
    ) -> Result<ProcessEngineCommandResult> {
        let plan = self.plan(change);
        self.validate_hooks(&plan)?;

        let identifier = instance.identifier();
        let mut ctx = ProcessEngineCommandContext::new(instance, cancellation);
        for planned in &plan {
            if matches!(planned.event.kind, TransitionKind::TaskStart | TransitionKind::ProcessEnd) {
                ctx.instance.set_process_state(change.new_state.clone());
            }

            let result = self.pipeline.execute(&planned.set, &mut ctx).await;
            if let ProcessEngineCommandResult::Failed(failure) = &result {
                warn!(
                    instance = %identifier,
                    transition = %planned.event.kind,
                    reason = %failure,
                    "Transition failed"
                );
                return Ok(result);
            }
        }

        info!(
            instance = %identifier,
            to = ?change.new_state.current_task_id(),
            events = plan.len(),
            "Transition completed"
        );
        Ok(ProcessEngineCommandResult::Successful)
    }

    // At-most-one rules for every event, checked before any command runs.
    fn validate_hooks(&self, plan: &[PlannedSet]) -> Result<()> {
        for planned in plan {
            let task_id = planned
                .event
                .task
                .as_ref()
                .map(|t| t.element_id.as_str())
                .unwrap_or_default();
            match planned.event.kind {
                TransitionKind::TaskEnd => self.hooks.validate(HookKind::TaskEnding, task_id)?,
                TransitionKind::ProcessEnd => self.hooks.validate(HookKind::ProcessEnding, task_id)?,
                TransitionKind::TaskStart | TransitionKind::TaskAbandon => {}
            }
        }
        Ok(())
    }

    /// Hand `change` to the remote tier and wait for its job to settle.
    pub async fn dispatch_transition<C: ProcessEngineClient>(
        &self,
        client: &C,
        request: &RequestContext,
        instance: &Instance,
        change: &ProcessStateChange,
        actor: ProcessEngineActor,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let mut locker = self.locker(request);
        locker.lock().await?;

        let outcome = self
            .dispatch_locked(client, instance, change, actor, &cancellation)
            .await;
        locker.release().await;
        outcome
    }

    async fn dispatch_locked<C: ProcessEngineClient>(
        &self,
        client: &C,
        instance: &Instance,
        change: &ProcessStateChange,
        actor: ProcessEngineActor,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        self.validate_hooks(&self.plan(change))?;

        let factory = ProcessNextRequestFactory::new(&self.service_tasks);
        let next = factory.create(instance, change, actor);
        client.process_next(instance.identifier, &next).await?;
        info!(
            instance = %instance.identifier,
            tasks = next.tasks.len(),
            "Dispatched transition to process engine"
        );

        wait_for_engine_response(client, instance.identifier, &self.poll, cancellation).await
    }

    fn locker(&self, request: &RequestContext) -> InstanceLocker {
        InstanceLocker::new(self.lock_client.clone(), request.clone()).with_default_ttl(self.lock_ttl)
    }
}
