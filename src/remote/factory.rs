use std::sync::Arc;

use super::types::{InstanceInformation, ProcessEngineActor, ProcessNextRequest};
use crate::engine::{ProcessStateChange, plan_transition};
use crate::hooks::ServiceTask;
use crate::instance::Instance;

/// Builds the request the remote tier executes for a state change.
///
/// Each event contributes its primary commands followed by its post-commit
/// commands, so every event's persistence runs before the next event starts.
pub struct ProcessNextRequestFactory<'a> {
    service_tasks: &'a [Arc<dyn ServiceTask>],
}

impl<'a> ProcessNextRequestFactory<'a> {
    pub fn new(service_tasks: &'a [Arc<dyn ServiceTask>]) -> Self {
        Self { service_tasks }
    }

    pub fn create(&self, instance: &Instance, change: &ProcessStateChange, actor: ProcessEngineActor) -> ProcessNextRequest {
        let tasks = plan_transition(change, self.service_tasks)
            .into_iter()
            .flat_map(|planned| planned.set.flatten())
            .collect();

        ProcessNextRequest {
            current_element_id: change.old_state.current_task_id().unwrap_or_default().to_string(),
            desired_element_id: change.new_state.current_task_id().unwrap_or_default().to_string(),
            instance_information: InstanceInformation::from(instance),
            actor,
            tasks,
        }
    }
}
