//! App-defined hooks and the collaborators built-in commands call into.
//!
//! Everything here is passed in explicitly when the command registry is
//! built. Hooks are tagged with the lifecycle point and task they apply to,
//! and selected by lookup rather than by querying a container.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::instance::{Instance, InstanceDataMutator, InstanceIdentifier};

/// Lifecycle point an app hook runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookKind {
    TaskStarting,
    TaskEnding,
    TaskAbandon,
    ProcessEnding,
}

impl HookKind {
    /// Kinds where more than one matching hook is a configuration error.
    pub fn allows_at_most_one(self) -> bool {
        matches!(self, HookKind::TaskEnding | HookKind::ProcessEnding)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::TaskStarting => write!(f, "task starting"),
            HookKind::TaskEnding => write!(f, "task ending"),
            HookKind::TaskAbandon => write!(f, "task abandon"),
            HookKind::ProcessEnding => write!(f, "process ending"),
        }
    }
}

/// An app-defined hook.
#[async_trait]
pub trait ProcessHook: Send + Sync {
    fn kind(&self) -> HookKind;

    /// Task this hook is bound to. `None` matches every task.
    fn task_id(&self) -> Option<&str> {
        None
    }

    async fn run(&self, instance: &mut dyn InstanceDataMutator, task_id: &str) -> Result<()>;
}

/// The hooks an app registered, in registration order.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn ProcessHook>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: impl ProcessHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn push(&mut self, hook: Arc<dyn ProcessHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// All hooks of `kind` that apply to `task_id`.
    pub fn matching(&self, kind: HookKind, task_id: &str) -> Vec<Arc<dyn ProcessHook>> {
        self.hooks
            .iter()
            .filter(|h| h.kind() == kind)
            .filter(|h| h.task_id().is_none_or(|t| t == task_id))
            .cloned()
            .collect()
    }

    /// The single hook of `kind` for `task_id`, if any.
    pub fn resolve_single(
        &self,
        kind: HookKind,
        task_id: &str,
    ) -> Result<Option<Arc<dyn ProcessHook>>, EngineError> {
        let mut matching = self.matching(kind, task_id);
        match matching.len() {
            0 => Ok(None),
            1 => Ok(matching.pop()),
            count => Err(EngineError::MultipleHandlers {
                kind,
                task_id: task_id.to_string(),
                count,
            }),
        }
    }

    /// Check the at-most-one rule for `kind` without running anything.
    pub fn validate(&self, kind: HookKind, task_id: &str) -> Result<(), EngineError> {
        if kind.allows_at_most_one() {
            self.resolve_single(kind, task_id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Legacy per-app task event handler. Every method defaults to a no-op.
#[async_trait]
pub trait TaskEvents: Send + Sync {
    async fn on_start_task(&self, _instance: &mut dyn InstanceDataMutator, _task_id: &str) -> Result<()> {
        Ok(())
    }

    async fn on_end_task(&self, _instance: &mut dyn InstanceDataMutator, _task_id: &str) -> Result<()> {
        Ok(())
    }

    async fn on_abandon_task(&self, _instance: &mut dyn InstanceDataMutator, _task_id: &str) -> Result<()> {
        Ok(())
    }

    async fn on_end_process(&self, _instance: &mut dyn InstanceDataMutator) -> Result<()> {
        Ok(())
    }
}

pub struct NoopTaskEvents;

impl TaskEvents for NoopTaskEvents {}

/// Behaviour bound to a task type (`data`, `signing`, ...).
#[async_trait]
pub trait ProcessTask: Send + Sync {
    fn task_type(&self) -> &str;

    async fn start(&self, _instance: &mut dyn InstanceDataMutator, _task_id: &str) -> Result<()> {
        Ok(())
    }

    async fn end(&self, _instance: &mut dyn InstanceDataMutator, _task_id: &str) -> Result<()> {
        Ok(())
    }

    async fn abandon(&self, _instance: &mut dyn InstanceDataMutator, _task_id: &str) -> Result<()> {
        Ok(())
    }
}

/// A task executed by the engine rather than a user, e.g. PDF generation.
#[async_trait]
pub trait ServiceTask: Send + Sync {
    fn task_type(&self) -> &str;

    async fn execute(&self, instance: &mut dyn InstanceDataMutator) -> Result<()>;
}

/// Find the process task registered for `task_type`, ignoring case.
pub fn find_process_task<'a>(
    process_tasks: &'a [Arc<dyn ProcessTask>],
    task_type: &str,
) -> Option<&'a Arc<dyn ProcessTask>> {
    process_tasks
        .iter()
        .find(|t| t.task_type().eq_ignore_ascii_case(task_type))
}

/// Find the service task registered for `task_type`, ignoring case.
pub fn find_service_task<'a>(
    service_tasks: &'a [Arc<dyn ServiceTask>],
    task_type: &str,
) -> Option<&'a Arc<dyn ServiceTask>> {
    service_tasks
        .iter()
        .find(|t| t.task_type().eq_ignore_ascii_case(task_type))
}

/// Instance events published after a transition commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceEventType {
    InstanceCreated,
    MovedTo,
    Completed,
}

impl fmt::Display for InstanceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceEventType::InstanceCreated => write!(f, "app.instance.created"),
            InstanceEventType::MovedTo => write!(f, "app.instance.process.movedTo"),
            InstanceEventType::Completed => write!(f, "app.instance.process.completed"),
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, instance: &Instance, event: InstanceEventType) -> Result<()>;
}

pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _instance: &Instance, _event: InstanceEventType) -> Result<()> {
        Ok(())
    }
}

/// Durable storage for instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn update_process_state(&self, instance: &Instance) -> Result<()>;

    async fn delete_instance(&self, identifier: InstanceIdentifier) -> Result<()>;
}

pub struct NoopInstanceStore;

#[async_trait]
impl InstanceStore for NoopInstanceStore {
    async fn update_process_state(&self, _instance: &Instance) -> Result<()> {
        Ok(())
    }

    async fn delete_instance(&self, _identifier: InstanceIdentifier) -> Result<()> {
        Ok(())
    }
}
