//! Action definitions

use std::collections::BTreeSet;

use adcm_config::{ConfigSpec, StateScope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::concern::ConcernCause;
use super::ids::{ActionId, PrototypeId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// A single script
    #[default]
    Job,
    /// An ordered list of sub-scripts
    Task,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    #[default]
    Ansible,
    Internal,
    Python,
}

/// Scripts executed by the engine itself rather than by the runner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalScript {
    BundleSwitch,
    BundleRevert,
    HcApply,
}

impl InternalScript {
    pub fn parse(script: &str) -> Option<Self> {
        match script {
            "bundle_switch" => Some(InternalScript::BundleSwitch),
            "bundle_revert" => Some(InternalScript::BundleRevert),
            "hc_apply" => Some(InternalScript::HcApply),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InternalScript::BundleSwitch => "bundle_switch",
            InternalScript::BundleRevert => "bundle_revert",
            InternalScript::HcApply => "hc_apply",
        }
    }
}

/// State mutations applied on success or failure
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanges {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi_state_set: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi_state_unset: Vec<String>,
}

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.multi_state_set.is_empty() && self.multi_state_unset.is_empty()
    }

    /// Apply to a state and multi-state pair
    pub fn apply_to(&self, state: &mut String, multi_state: &mut BTreeSet<String>) {
        if let Some(new_state) = &self.state {
            state.clone_from(new_state);
        }
        for flag in &self.multi_state_set {
            multi_state.insert(flag.clone());
        }
        for flag in &self.multi_state_unset {
            multi_state.remove(flag);
        }
    }

    /// Later changes win over earlier ones
    pub fn merge(&mut self, other: &StateChanges) {
        if other.state.is_some() {
            self.state.clone_from(&other.state);
        }
        for flag in &other.multi_state_set {
            self.multi_state_unset.retain(|f| f != flag);
            if !self.multi_state_set.contains(flag) {
                self.multi_state_set.push(flag.clone());
            }
        }
        for flag in &other.multi_state_unset {
            self.multi_state_set.retain(|f| f != flag);
            if !self.multi_state_unset.contains(flag) {
                self.multi_state_unset.push(flag.clone());
            }
        }
    }
}

/// States in which an action may be launched
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    #[serde(default)]
    pub state_available: StateScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_unavailable: Vec<String>,
    #[serde(default)]
    pub multi_state_available: StateScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi_state_unavailable: Vec<String>,
}

impl Availability {
    pub fn allows(&self, state: &str, multi_state: &BTreeSet<String>) -> bool {
        if !self.state_available.contains(state) || self.state_unavailable.iter().any(|s| s == state)
        {
            return false;
        }
        if !self.multi_state_available.is_any()
            && !self.multi_state_available.intersects(multi_state.iter())
        {
            return false;
        }
        !self
            .multi_state_unavailable
            .iter()
            .any(|flag| multi_state.contains(flag))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HcAclAction {
    Add,
    Remove,
}

/// Host-component change an action is permitted to make
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HcAclRule {
    pub service: String,
    pub component: String,
    pub action: HcAclAction,
}

/// One step of a task-type action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubAction {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub script: String,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub on_fail: StateChanges,
    /// Overrides the action-level flag when set
    #[serde(default)]
    pub allow_to_terminate: Option<bool>,
}

impl SubAction {
    pub fn internal_script(&self) -> Option<InternalScript> {
        match self.script_type {
            ScriptType::Internal => InternalScript::parse(&self.script),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Declarative operation attached to a prototype
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub prototype_id: PrototypeId,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: ActionType,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub sub_actions: Vec<SubAction>,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub on_success: StateChanges,
    #[serde(default)]
    pub on_fail: StateChanges,
    #[serde(default)]
    pub host_action: bool,
    #[serde(default)]
    pub allow_for_action_host_group: bool,
    #[serde(default)]
    pub allow_in_maintenance_mode: bool,
    #[serde(default)]
    pub allow_to_terminate: bool,
    #[serde(default)]
    pub hc_acl: Vec<HcAclRule>,
    #[serde(default = "default_true")]
    pub restore_hc_on_fail: bool,
    #[serde(default)]
    pub config: ConfigSpec,
    #[serde(default)]
    pub available_in_concerns: bool,
    #[serde(default)]
    pub allowed_concern_causes: Vec<ConcernCause>,
    #[serde(default)]
    pub is_upgrade: bool,
}

impl Action {
    /// Action of type `job` running a single ansible script
    pub fn job(id: ActionId, prototype_id: PrototypeId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            prototype_id,
            display_name: name.clone(),
            script: format!("{}.yaml", name),
            name,
            description: String::new(),
            kind: ActionType::Job,
            script_type: ScriptType::Ansible,
            params: Value::Null,
            sub_actions: Vec::new(),
            availability: Availability::default(),
            on_success: StateChanges::default(),
            on_fail: StateChanges::default(),
            host_action: false,
            allow_for_action_host_group: false,
            allow_in_maintenance_mode: false,
            allow_to_terminate: false,
            hc_acl: Vec::new(),
            restore_hc_on_fail: true,
            config: ConfigSpec::default(),
            available_in_concerns: false,
            allowed_concern_causes: Vec::new(),
            is_upgrade: false,
        }
    }

    /// Action declares a host-component map payload
    pub fn changes_hostcomponent(&self) -> bool {
        !self.hc_acl.is_empty()
    }

    /// Concern of `cause` does not prevent launching this action
    pub fn tolerates(&self, cause: Option<ConcernCause>) -> bool {
        self.available_in_concerns
            && cause.is_some_and(|c| self.allowed_concern_causes.contains(&c))
    }

    /// Steps of the action in execution order
    pub fn steps(&self) -> Vec<SubAction> {
        match self.kind {
            ActionType::Job => vec![SubAction {
                name: self.name.clone(),
                display_name: self.display_name.clone(),
                script: self.script.clone(),
                script_type: self.script_type,
                params: self.params.clone(),
                on_fail: self.on_fail.clone(),
                allow_to_terminate: Some(self.allow_to_terminate),
            }],
            ActionType::Task => self.sub_actions.clone(),
        }
    }

    /// An hc_acl rule allows `action` on `service.component`
    pub fn hc_acl_allows(&self, service: &str, component: &str, action: HcAclAction) -> bool {
        self.hc_acl
            .iter()
            .any(|r| r.service == service && r.component == component && r.action == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_availability() {
        let mut availability = Availability::default();
        assert!(availability.allows("created", &BTreeSet::new()));

        availability.state_available = StateScope::States(vec!["installed".into()]);
        assert!(!availability.allows("created", &BTreeSet::new()));
        assert!(availability.allows("installed", &BTreeSet::new()));

        availability.multi_state_unavailable = vec!["upgrading".into()];
        assert!(!availability.allows("installed", &flags(&["upgrading"])));

        availability.multi_state_available = StateScope::States(vec!["ready".into()]);
        assert!(!availability.allows("installed", &BTreeSet::new()));
        assert!(availability.allows("installed", &flags(&["ready"])));
    }

    #[test]
    fn test_state_changes() {
        let mut state = "created".to_string();
        let mut multi = flags(&["a"]);
        let changes = StateChanges {
            state: Some("installed".into()),
            multi_state_set: vec!["b".into()],
            multi_state_unset: vec!["a".into()],
        };
        changes.apply_to(&mut state, &mut multi);
        assert_eq!(state, "installed");
        assert_eq!(multi, flags(&["b"]));

        let mut pending = StateChanges::default();
        pending.merge(&changes);
        pending.merge(&StateChanges {
            state: None,
            multi_state_set: vec!["a".into()],
            multi_state_unset: vec![],
        });
        assert_eq!(pending.state.as_deref(), Some("installed"));
        assert!(pending.multi_state_unset.is_empty());
        assert_eq!(pending.multi_state_set, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_steps_and_tolerance() {
        let mut action = Action::job(ActionId(1), PrototypeId(1), "install");
        assert_eq!(action.steps().len(), 1);
        assert_eq!(action.steps()[0].script, "install.yaml");

        assert!(!action.tolerates(Some(ConcernCause::Config)));
        action.available_in_concerns = true;
        action.allowed_concern_causes = vec![ConcernCause::Config];
        assert!(action.tolerates(Some(ConcernCause::Config)));
        assert!(!action.tolerates(Some(ConcernCause::Job)));
        assert!(!action.tolerates(None));
    }

    #[test]
    fn test_internal_script() {
        let sub = SubAction {
            name: "switch".into(),
            display_name: String::new(),
            script: "bundle_switch".into(),
            script_type: ScriptType::Internal,
            params: Value::Null,
            on_fail: StateChanges::default(),
            allow_to_terminate: None,
        };
        assert_eq!(sub.internal_script(), Some(InternalScript::BundleSwitch));
    }
}
