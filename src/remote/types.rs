//! Wire types exchanged with the remote process engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::CommandRequest;
use crate::instance::Instance;

/// Who asked for the transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEngineActor {
    pub user_id_or_org_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInformation {
    pub org: String,
    pub app: String,
    pub instance_owner_party_id: i64,
    pub instance_guid: Uuid,
}

impl From<&Instance> for InstanceInformation {
    fn from(instance: &Instance) -> Self {
        Self {
            org: instance.org.clone(),
            app: instance.app.clone(),
            instance_owner_party_id: instance.identifier.instance_owner_party_id,
            instance_guid: instance.identifier.instance_guid,
        }
    }
}

/// Body of `POST .../process-engine/next`.
///
/// `tasks` is every command of every event in execution order; the remote
/// tier runs them as one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessNextRequest {
    pub current_element_id: String,
    pub desired_element_id: String,
    pub instance_information: InstanceInformation,
    pub actor: ProcessEngineActor,
    pub tasks: Vec<CommandRequest>,
}
