//! Instance events published once a transition has committed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{Command, CommandKey, ProcessEngineCommandContext, ProcessEngineCommandResult};
use crate::hooks::{EventPublisher, InstanceEventType};

async fn publish(
    publisher: &dyn EventPublisher,
    event: InstanceEventType,
    ctx: &ProcessEngineCommandContext<'_>,
) -> ProcessEngineCommandResult {
    let instance = ctx.instance.instance();
    match publisher.publish(instance, event).await {
        Ok(()) => {
            debug!(instance = %instance.identifier, %event, "Published instance event");
            ProcessEngineCommandResult::Successful
        }
        Err(e) => ProcessEngineCommandResult::from_error(format!("failed to publish {event}"), &e),
    }
}

macro_rules! event_command {
    ($(#[$doc:meta])* $name:ident, $event:expr) => {
        $(#[$doc])*
        pub struct $name {
            publisher: Arc<dyn EventPublisher>,
        }

        impl $name {
            pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
                Self { publisher }
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
                publish(self.publisher.as_ref(), $event, ctx).await
            }
        }
    };
}

event_command!(MovedToAltinnEvent, InstanceEventType::MovedTo);
event_command!(
    /// Only part of the first task start of a process.
    InstanceCreatedAltinnEvent,
    InstanceEventType::InstanceCreated
);
event_command!(CompletedAltinnEvent, InstanceEventType::Completed);
