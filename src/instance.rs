//! In-memory view of a case instance and the mutator commands work through.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of an instance: owner party plus instance GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentifier {
    pub instance_owner_party_id: i64,
    pub instance_guid: Uuid,
}

impl InstanceIdentifier {
    pub fn new(instance_owner_party_id: i64, instance_guid: Uuid) -> Self {
        Self {
            instance_owner_party_id,
            instance_guid,
        }
    }

    /// Parse the `{party}/{guid}` form used in instance ids.
    pub fn parse(id: &str) -> Option<Self> {
        let (party, guid) = id.split_once('/')?;
        Some(Self {
            instance_owner_party_id: party.parse().ok()?,
            instance_guid: Uuid::parse_str(guid).ok()?,
        })
    }
}

impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance_owner_party_id, self.instance_guid)
    }
}

/// The task an instance currently sits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub element_id: String,
    /// Task type, e.g. `data`, `signing`, `pdf`.
    pub task_type: Option<String>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub fn new(element_id: impl Into<String>, task_type: Option<&str>) -> Self {
        Self {
            element_id: element_id.into(),
            task_type: task_type.map(str::to_string),
            started: None,
            ended: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    pub started: Option<DateTime<Utc>>,
    pub current_task: Option<TaskInfo>,
    pub ended: Option<DateTime<Utc>>,
}

impl ProcessState {
    pub fn at_task(task: TaskInfo) -> Self {
        Self {
            started: Some(Utc::now()),
            current_task: Some(task),
            ended: None,
        }
    }

    pub fn ended() -> Self {
        Self {
            started: None,
            current_task: None,
            ended: Some(Utc::now()),
        }
    }

    pub fn current_task_id(&self) -> Option<&str> {
        self.current_task.as_ref().map(|t| t.element_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataElement {
    pub id: Uuid,
    pub data_type: String,
    /// Task the element belongs to; `None` for instance-wide attachments.
    pub task_id: Option<String>,
    pub locked: bool,
}

impl DataElement {
    pub fn new(data_type: impl Into<String>, task_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data_type: data_type.into(),
            task_id: task_id.map(str::to_string),
            locked: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub identifier: InstanceIdentifier,
    pub org: String,
    pub app: String,
    pub process: ProcessState,
    #[serde(default)]
    pub data: Vec<DataElement>,
}

impl Instance {
    pub fn new(identifier: InstanceIdentifier, org: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            identifier,
            org: org.into(),
            app: app.into(),
            process: ProcessState::default(),
            data: Vec::new(),
        }
    }

    /// Data elements that belong to `task_id`.
    pub fn task_data_mut<'a>(&'a mut self, task_id: &'a str) -> impl Iterator<Item = &'a mut DataElement> + 'a {
        self.data
            .iter_mut()
            .filter(move |d| d.task_id.as_deref() == Some(task_id))
    }
}

/// Mutable access to the instance for the duration of one transition.
///
/// The pipeline owns the mutator exclusively; commands read the current
/// task and write process state through it.
pub trait InstanceDataMutator: Send + Sync {
    fn instance(&self) -> &Instance;

    fn instance_mut(&mut self) -> &mut Instance;

    fn identifier(&self) -> InstanceIdentifier {
        self.instance().identifier
    }

    fn current_task_id(&self) -> Option<&str> {
        self.instance().process.current_task_id()
    }

    fn current_task_type(&self) -> Option<&str> {
        self.instance()
            .process
            .current_task
            .as_ref()
            .and_then(|t| t.task_type.as_deref())
    }

    fn set_process_state(&mut self, state: ProcessState) {
        self.instance_mut().process = state;
    }
}

/// Owned in-memory mutator that remembers whether anything changed.
#[derive(Debug, Clone)]
pub struct InstanceData {
    instance: Instance,
    dirty: bool,
}

impl InstanceData {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn into_instance(self) -> Instance {
        self.instance
    }
}

impl InstanceDataMutator for InstanceData {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    fn instance_mut(&mut self) -> &mut Instance {
        self.dirty = true;
        &mut self.instance
    }
}
