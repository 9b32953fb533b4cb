//! Run requests accepted by the scheduler

use adcm_persistence::{ActionHostGroupId, ActionId, HcEntry, ObjectRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_blocking() -> bool {
    true
}

/// Payload of an action run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunPayload {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub attr: Value,
    /// Desired host-component map for actions with `hc_acl`
    #[serde(default)]
    pub hostcomponent: Option<Vec<HcEntry>>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_blocking")]
    pub is_blocking: bool,
}

impl Default for RunPayload {
    fn default() -> Self {
        Self {
            config: None,
            attr: Value::Null,
            hostcomponent: None,
            verbose: false,
            is_blocking: true,
        }
    }
}

impl RunPayload {
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_hostcomponent(mut self, hc: Vec<HcEntry>) -> Self {
        self.hostcomponent = Some(hc);
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.is_blocking = false;
        self
    }
}

/// Where an action runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunTarget {
    Object { object: ObjectRef },
    ActionHostGroup { group: ActionHostGroupId },
}

/// `RunAction(actor, owner, action, payload)`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunActionRequest {
    pub target: RunTarget,
    pub action_id: ActionId,
    #[serde(default)]
    pub payload: RunPayload,
}

impl RunActionRequest {
    pub fn on(object: ObjectRef, action_id: ActionId) -> Self {
        Self {
            target: RunTarget::Object { object },
            action_id,
            payload: RunPayload::default(),
        }
    }

    pub fn on_group(group: ActionHostGroupId, action_id: ActionId) -> Self {
        Self {
            target: RunTarget::ActionHostGroup { group },
            action_id,
            payload: RunPayload::default(),
        }
    }

    pub fn with_payload(mut self, payload: RunPayload) -> Self {
        self.payload = payload;
        self
    }
}
