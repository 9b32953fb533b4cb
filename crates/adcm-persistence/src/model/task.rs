//! Tasks, jobs and host-component tuples

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::{ScriptType, StateChanges};
use super::ids::{
    ActionHostGroupId, ActionId, ComponentId, HostId, JobId, ServiceId, TaskId, UpgradeId,
};
use super::object::{MaintenanceMode, ObjectRef};

/// Placement of a component on a host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HcEntry {
    pub service_id: ServiceId,
    pub component_id: ComponentId,
    pub host_id: HostId,
}

impl HcEntry {
    pub fn new(service_id: ServiceId, component_id: ComponentId, host_id: HostId) -> Self {
        Self {
            service_id,
            component_id,
            host_id,
        }
    }
}

impl fmt::Display for HcEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(service {}, component {}, host {})",
            self.service_id, self.component_id, self.host_id
        )
    }
}

/// Status shared by tasks and jobs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Running,
    Success,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Aborted)
    }

    /// Statuses only move forward; terminal ones never change
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Created => {
                matches!(next, JobStatus::Running | JobStatus::Failed | JobStatus::Aborted)
            }
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalised path entry recorded for the runner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorEntry {
    pub id: u64,
    pub name: String,
}

/// Maintenance mode switch carried out by a bundle action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceModeTransition {
    pub object: ObjectRef,
    pub target: MaintenanceMode,
    pub previous: MaintenanceMode,
}

/// One invocation of an action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub action_id: ActionId,
    pub owner: ObjectRef,
    #[serde(default)]
    pub action_host_group: Option<ActionHostGroupId>,
    /// Hosts a host action expands to
    #[serde(default)]
    pub hosts: Vec<HostId>,
    #[serde(default)]
    pub selector: BTreeMap<String, SelectorEntry>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub attr: Value,
    /// Host-component map requested by the payload
    #[serde(default)]
    pub hostcomponent: Option<Vec<HcEntry>>,
    /// Host-component map of the cluster at submission
    #[serde(default)]
    pub hostcomponent_snapshot: Vec<HcEntry>,
    /// Map applied after the bundle switch of an upgrade
    #[serde(default)]
    pub post_upgrade_hc: Vec<HcEntry>,
    #[serde(default)]
    pub verbose: bool,
    pub is_blocking: bool,
    pub status: JobStatus,
    #[serde(default)]
    pub upgrade_id: Option<UpgradeId>,
    #[serde(default)]
    pub maintenance_mode: Option<MaintenanceModeTransition>,
    /// State mutations accumulated by successful jobs, committed at the end
    #[serde(default)]
    pub pending: StateChanges,
    #[serde(default)]
    pub cancel_requested: bool,
    pub actor: String,
    pub start_date: Option<DateTime<Utc>>,
    pub finish_date: Option<DateTime<Utc>>,
}

/// One script execution within a task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_id: TaskId,
    pub position: u32,
    pub name: String,
    pub display_name: String,
    pub script: String,
    pub script_type: ScriptType,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub state_on_fail: Option<String>,
    #[serde(default)]
    pub multi_state_on_fail_set: Vec<String>,
    #[serde(default)]
    pub multi_state_on_fail_unset: Vec<String>,
    pub allow_to_terminate: bool,
    pub status: JobStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    pub start_date: Option<DateTime<Utc>>,
    pub finish_date: Option<DateTime<Utc>>,
}

impl Job {
    pub fn on_fail(&self) -> StateChanges {
        StateChanges {
            state: self.state_on_fail.clone(),
            multi_state_set: self.multi_state_on_fail_set.clone(),
            multi_state_unset: self.multi_state_on_fail_unset.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use JobStatus::*;
        assert!(Created.can_transition_to(Running));
        assert!(Created.can_transition_to(Aborted));
        assert!(!Created.can_transition_to(Success));
        assert!(Running.can_transition_to(Success));
        assert!(Running.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Created));
        assert!(!Running.can_transition_to(Running));
        for terminal in [Success, Failed, Aborted] {
            assert!(terminal.is_terminal());
            for next in [Created, Running, Success, Failed, Aborted] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
