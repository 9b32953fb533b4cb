//! Who runs an operation and on whose behalf

use adcm_common::Principal;
use adcm_persistence::TaskId;

/// Where an operation comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// External request
    Api,
    /// Issued by a running task (internal scripts, plugins); the task's own
    /// lock does not block it
    Task(TaskId),
}

#[derive(Clone, Debug)]
pub struct OpContext {
    pub actor: Principal,
    pub origin: Origin,
}

impl OpContext {
    pub fn api(actor: Principal) -> Self {
        Self {
            actor,
            origin: Origin::Api,
        }
    }

    pub fn system() -> Self {
        Self::api(Principal::system())
    }

    pub fn task(task_id: TaskId, actor: Principal) -> Self {
        Self {
            actor,
            origin: Origin::Task(task_id),
        }
    }

    pub fn origin_task(&self) -> Option<TaskId> {
        self.origin.task()
    }
}

impl Origin {
    pub fn task(self) -> Option<TaskId> {
        match self {
            Origin::Api => None,
            Origin::Task(id) => Some(id),
        }
    }
}
