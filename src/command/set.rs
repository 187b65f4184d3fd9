use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::builtin::events::{CompletedAltinnEvent, InstanceCreatedAltinnEvent, MovedToAltinnEvent};
use super::builtin::hooks::{
    AbandonTaskLegacyHook, EndTaskLegacyHook, OnTaskAbandonHook, OnTaskEndingHook, OnTaskStartingHook,
    OnWorkflowEndingHook, WorkflowEndLegacyHook, WorkflowTaskStartLegacyHook,
};
use super::builtin::service_task::ExecuteServiceTask;
use super::builtin::storage::{DeleteInstance, UpdateProcessStateInStorage};
use super::builtin::task_data::{LockTaskData, UnlockTaskData};
use super::builtin::task_lifecycle::{
    CommonTaskFinalization, CommonTaskInitialization, WorkflowTaskAbandon, WorkflowTaskEnd, WorkflowTaskStart,
};
use super::{CommandKey, CommandRequest, ExecuteServiceTaskPayload};

/// The lifecycle transitions that have a command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    TaskStart,
    TaskEnd,
    TaskAbandon,
    ProcessEnd,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 4] = [
        TransitionKind::TaskStart,
        TransitionKind::TaskEnd,
        TransitionKind::TaskAbandon,
        TransitionKind::ProcessEnd,
    ];
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::TaskStart => write!(f, "TASK_START"),
            TransitionKind::TaskEnd => write!(f, "TASK_END"),
            TransitionKind::TaskAbandon => write!(f, "TASK_ABANDON"),
            TransitionKind::ProcessEnd => write!(f, "PROCESS_END"),
        }
    }
}

impl FromStr for TransitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "taskstart" => Ok(TransitionKind::TaskStart),
            "taskend" => Ok(TransitionKind::TaskEnd),
            "taskabandon" => Ok(TransitionKind::TaskAbandon),
            "processend" => Ok(TransitionKind::ProcessEnd),
            other => Err(format!("unknown transition kind: {other}")),
        }
    }
}

/// Commands for one transition: the primary sequence plus the commands that
/// run once the new process state has been committed.
///
/// The primary list runs strictly in order. A failure aborts the remaining
/// primary commands and skips every post-commit command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCommandSet {
    pub commands: Vec<CommandRequest>,
    pub post_commit: Vec<CommandRequest>,
}

impl WorkflowCommandSet {
    fn add(mut self, key: &str) -> Self {
        self.commands.push(CommandRequest::new(key));
        self
    }

    fn add_post_commit(mut self, request: CommandRequest) -> Self {
        self.post_commit.push(request);
        self
    }

    /// Every key in the set, primary first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.commands
            .iter()
            .chain(self.post_commit.iter())
            .map(|r| r.command_key.as_str())
    }

    /// Primary and post-commit requests flattened in execution order.
    pub fn flatten(&self) -> Vec<CommandRequest> {
        self.commands.iter().chain(self.post_commit.iter()).cloned().collect()
    }
}

/// Static mapping from a transition to its command set.
pub struct CommandSetBuilder;

impl CommandSetBuilder {
    /// Resolve the command set for a transition.
    ///
    /// `service_task_type` only affects task starts: when present the service
    /// task is executed after commit. `is_initial_task_start` marks the first
    /// task of a freshly started process.
    pub fn build(
        kind: TransitionKind,
        service_task_type: Option<&str>,
        is_initial_task_start: bool,
    ) -> WorkflowCommandSet {
        let set = match kind {
            TransitionKind::TaskStart => Self::task_start(service_task_type, is_initial_task_start),
            TransitionKind::TaskEnd => WorkflowCommandSet::default()
                .add(WorkflowTaskEnd::KEY)
                .add(CommonTaskFinalization::KEY)
                .add(EndTaskLegacyHook::KEY)
                .add(OnTaskEndingHook::KEY)
                .add(LockTaskData::KEY),
            TransitionKind::TaskAbandon => WorkflowCommandSet::default()
                .add(WorkflowTaskAbandon::KEY)
                .add(OnTaskAbandonHook::KEY)
                .add(AbandonTaskLegacyHook::KEY),
            TransitionKind::ProcessEnd => WorkflowCommandSet::default()
                .add(OnWorkflowEndingHook::KEY)
                .add(WorkflowEndLegacyHook::KEY),
        };

        let set = Self::with_commit_point(set);

        match kind {
            TransitionKind::ProcessEnd => set
                .add_post_commit(CommandRequest::new(CompletedAltinnEvent::KEY))
                .add_post_commit(CommandRequest::new(DeleteInstance::KEY)),
            _ => set,
        }
    }

    fn task_start(service_task_type: Option<&str>, is_initial_task_start: bool) -> WorkflowCommandSet {
        let mut set = Self::with_commit_point(
            WorkflowCommandSet::default()
                .add(UnlockTaskData::KEY)
                .add(WorkflowTaskStartLegacyHook::KEY)
                .add(OnTaskStartingHook::KEY)
                .add(CommonTaskInitialization::KEY)
                .add(WorkflowTaskStart::KEY),
        )
        .add_post_commit(CommandRequest::new(MovedToAltinnEvent::KEY));

        if let Some(service_task_type) = service_task_type {
            let payload = ExecuteServiceTaskPayload {
                service_task_type: service_task_type.to_string(),
            };
            // A payload-less request fails at execution with "payload is missing".
            let request = CommandRequest::with_payload(ExecuteServiceTask::KEY, &payload).unwrap_or_else(|e| {
                error!(error = %e, service_task_type, "Failed to encode service task payload");
                CommandRequest::new(ExecuteServiceTask::KEY)
            });
            set = set.add_post_commit(request);
        }

        if is_initial_task_start {
            set = set.add_post_commit(CommandRequest::new(InstanceCreatedAltinnEvent::KEY));
        }

        set
    }

    // Persisting the mutated instance heads every post-commit list; it is
    // the commit point the post-commit commands run after.
    fn with_commit_point(set: WorkflowCommandSet) -> WorkflowCommandSet {
        set.add_post_commit(CommandRequest::new(UpdateProcessStateInStorage::KEY))
    }

    /// Every (kind, service task type, initial start) combination the engine
    /// can produce.
    pub fn all_variants() -> Vec<(TransitionKind, Option<&'static str>, bool)> {
        let mut variants = Vec::new();
        for service_task_type in [None, Some("ServiceTask")] {
            for initial in [false, true] {
                variants.push((TransitionKind::TaskStart, service_task_type, initial));
            }
        }
        variants.push((TransitionKind::TaskEnd, None, false));
        variants.push((TransitionKind::TaskAbandon, None, false));
        variants.push((TransitionKind::ProcessEnd, None, false));
        variants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primary_keys(set: &WorkflowCommandSet) -> Vec<&str> {
        set.commands.iter().map(|r| r.command_key.as_str()).collect()
    }

    fn post_keys(set: &WorkflowCommandSet) -> Vec<&str> {
        set.post_commit.iter().map(|r| r.command_key.as_str()).collect()
    }

    #[test]
    fn every_variant_commits_exactly_once() {
        for (kind, service, initial) in CommandSetBuilder::all_variants() {
            let set = CommandSetBuilder::build(kind, service, initial);
            let count = set
                .post_commit
                .iter()
                .filter(|r| r.command_key == UpdateProcessStateInStorage::KEY)
                .count();
            assert_eq!(count, 1, "{kind} {service:?} {initial}");
            assert!(
                !primary_keys(&set).contains(&UpdateProcessStateInStorage::KEY),
                "{kind} persists before commit"
            );
        }
    }

    #[test]
    fn builder_is_deterministic() {
        for (kind, service, initial) in CommandSetBuilder::all_variants() {
            assert_eq!(
                CommandSetBuilder::build(kind, service, initial),
                CommandSetBuilder::build(kind, service, initial)
            );
        }
    }

    #[test]
    fn task_start_unlocks_first_and_starts_last() {
        let set = CommandSetBuilder::build(TransitionKind::TaskStart, None, true);
        assert_eq!(
            primary_keys(&set),
            vec![
                "UnlockTaskData",
                "WorkflowTaskStartLegacyHook",
                "OnTaskStartingHook",
                "CommonTaskInitialization",
                "WorkflowTaskStart",
            ]
        );
        assert_eq!(
            post_keys(&set),
            vec![
                "UpdateProcessStateInStorage",
                "MovedToAltinnEvent",
                "InstanceCreatedAltinnEvent",
            ]
        );
    }

    #[test]
    fn service_task_runs_after_commit_with_payload() {
        let set = CommandSetBuilder::build(TransitionKind::TaskStart, Some("pdf"), false);
        assert_eq!(
            post_keys(&set),
            vec!["UpdateProcessStateInStorage", "MovedToAltinnEvent", "ExecuteServiceTask"]
        );
        let request = &set.post_commit[2];
        assert_eq!(request.payload.as_ref().unwrap()["serviceTaskType"], "pdf");
    }

    #[test]
    fn task_end_locks_data_last() {
        let set = CommandSetBuilder::build(TransitionKind::TaskEnd, None, false);
        assert_eq!(
            primary_keys(&set),
            vec![
                "WorkflowTaskEnd",
                "CommonTaskFinalization",
                "EndTaskLegacyHook",
                "OnTaskEndingHook",
                "LockTaskData",
            ]
        );
        assert_eq!(post_keys(&set), vec!["UpdateProcessStateInStorage"]);
    }

    #[test]
    fn task_end_ignores_start_flags() {
        assert_eq!(
            CommandSetBuilder::build(TransitionKind::TaskEnd, Some("pdf"), true),
            CommandSetBuilder::build(TransitionKind::TaskEnd, None, false)
        );
    }

    #[test]
    fn task_abandon_sequence() {
        let set = CommandSetBuilder::build(TransitionKind::TaskAbandon, None, false);
        assert_eq!(
            primary_keys(&set),
            vec!["WorkflowTaskAbandon", "OnTaskAbandonHook", "AbandonTaskLegacyHook"]
        );
    }

    #[test]
    fn process_end_deletes_instance_after_commit() {
        let set = CommandSetBuilder::build(TransitionKind::ProcessEnd, None, false);
        assert_eq!(
            primary_keys(&set),
            vec!["OnWorkflowEndingHook", "WorkflowEndLegacyHook"]
        );
        assert_eq!(
            post_keys(&set),
            vec!["UpdateProcessStateInStorage", "CompletedAltinnEvent", "DeleteInstance"]
        );
    }

    #[test]
    fn flatten_keeps_execution_order() {
        let set = CommandSetBuilder::build(TransitionKind::TaskEnd, None, false);
        let flat: Vec<_> = set.flatten().into_iter().map(|r| r.command_key).collect();
        assert_eq!(flat.last().map(String::as_str), Some("UpdateProcessStateInStorage"));
        assert_eq!(flat.len(), 6);
    }

    #[test]
    fn transition_kind_parses_loosely() {
        assert_eq!("task-start".parse::<TransitionKind>().unwrap(), TransitionKind::TaskStart);
        assert_eq!("PROCESS_END".parse::<TransitionKind>().unwrap(), TransitionKind::ProcessEnd);
        assert_eq!("TaskAbandon".parse::<TransitionKind>().unwrap(), TransitionKind::TaskAbandon);
        assert!("restart".parse::<TransitionKind>().is_err());
    }
}
