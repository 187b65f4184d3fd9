//! Start-up completeness check for the command registry.
//!
//! Proves every command key any transition can reference has some registered
//! implementation. It says nothing about whether the implementation is right.

use std::collections::BTreeSet;

use tracing::{error, info};

use super::builtin::storage::UpdateProcessStateInStorage;
use super::{CommandKey, CommandRegistry, CommandSetBuilder};
use crate::error::{EngineError, Result};

/// Every command key the builder can emit, plus the persistence command.
pub fn required_command_keys() -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = CommandSetBuilder::all_variants()
        .into_iter()
        .flat_map(|(kind, service, initial)| {
            CommandSetBuilder::build(kind, service, initial)
                .keys()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();
    keys.insert(UpdateProcessStateInStorage::KEY.to_string());
    keys
}

/// Fail with every missing key if the registry cannot serve all transitions.
pub fn validate_command_registry(registry: &CommandRegistry) -> Result<()> {
    let missing: Vec<String> = required_command_keys()
        .into_iter()
        .filter(|key| !registry.contains(key))
        .collect();

    if missing.is_empty() {
        info!(
            registered = registry.len(),
            "Command registry covers every transition"
        );
        return Ok(());
    }

    error!(missing = ?missing, "Command registry is incomplete");
    Err(EngineError::MissingCommands { keys: missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::builtin::CommandDependencies;

    #[test]
    fn required_keys_cover_all_transitions() {
        let keys = required_command_keys();
        for key in [
            "UnlockTaskData",
            "LockTaskData",
            "WorkflowTaskStart",
            "ExecuteServiceTask",
            "InstanceCreatedAltinnEvent",
            "OnWorkflowEndingHook",
            "DeleteInstance",
            "UpdateProcessStateInStorage",
        ] {
            assert!(keys.contains(key), "missing {key}");
        }
        assert_eq!(keys.len(), 21);
    }

    #[test]
    fn builtin_registry_is_complete() {
        let registry = CommandRegistry::builtin(CommandDependencies::default());
        validate_command_registry(&registry).unwrap();
    }

    #[test]
    fn empty_registry_reports_every_key() {
        let err = validate_command_registry(&CommandRegistry::new()).unwrap_err();
        match err {
            EngineError::MissingCommands { keys } => assert_eq!(keys.len(), 21),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_any_single_key_fails_and_names_it() {
        let full = CommandRegistry::builtin(CommandDependencies::default());
        for removed in required_command_keys() {
            let mut registry = full.clone();
            registry.remove(&removed);
            let err = validate_command_registry(&registry).unwrap_err();
            let message = err.to_string();
            assert!(message.contains(&format!("'{removed}'")), "{message}");
        }
    }
}
