use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Command, CommandKey};

/// Explicit table from command key to implementation.
///
/// Keys come from [`CommandKey::KEY`] at compile time, so registration never
/// inspects the command at runtime.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under its key, replacing any earlier registration.
    pub fn register<C>(&mut self, command: C) -> &mut Self
    where
        C: Command + CommandKey + 'static,
    {
        debug_assert_eq!(command.key(), C::KEY, "command key() disagrees with KEY");
        if self.commands.insert(C::KEY, Arc::new(command)).is_some() {
            debug!(command = C::KEY, "Replaced existing command registration");
        }
        self
    }

    pub fn with<C>(mut self, command: C) -> Self
    where
        C: Command + CommandKey + 'static,
    {
        self.register(command);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(key).cloned()
    }

    pub fn remove(&mut self, key: &str) -> Option<Arc<dyn Command>> {
        self.commands.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.commands.contains_key(key)
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> BTreeSet<&'static str> {
        self.commands.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ProcessEngineCommandContext, ProcessEngineCommandResult};
    use async_trait::async_trait;

    struct Noop;

    impl CommandKey for Noop {
        const KEY: &'static str = "Noop";
    }

    #[async_trait]
    impl Command for Noop {
        fn key(&self) -> &'static str {
            Self::KEY
        }

        async fn execute(&self, _ctx: &mut ProcessEngineCommandContext<'_>) -> ProcessEngineCommandResult {
            ProcessEngineCommandResult::Successful
        }
    }

    #[test]
    fn register_uses_static_key() {
        let registry = CommandRegistry::new().with(Noop);
        assert!(registry.contains("Noop"));
        assert_eq!(registry.get("Noop").unwrap().key(), "Noop");
        assert!(registry.get("Other").is_none());
    }

    #[test]
    fn registering_twice_keeps_one_entry() {
        let mut registry = CommandRegistry::new();
        registry.register(Noop).register(Noop);
        assert_eq!(registry.len(), 1);
    }
}
