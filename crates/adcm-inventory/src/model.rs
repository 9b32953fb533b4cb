//! Inventory document handed to the runner
//!
//! Every map is ordered so that the same graph snapshot and task always
//! serialize to the same bytes.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// `{ "all": { "children": { <group>: ... } } }`
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Inventory {
    pub all: InventoryRoot,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InventoryRoot {
    pub children: BTreeMap<String, InventoryGroup>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InventoryGroup {
    pub hosts: BTreeMap<String, HostVars>,
    pub vars: GroupVars,
}

/// Variables shared by every host of a group
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupVars {
    Cluster(ClusterVars),
    Provider(ProviderVars),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterVars {
    pub cluster: ObjectNode,
    pub services: BTreeMap<String, ServiceNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderVars {
    pub provider: ObjectNode,
}

/// State and configuration of one object
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectNode {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub state: String,
    pub multi_state: Vec<String>,
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_upgrade: Option<BeforeUpgradeNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imports: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_mode: Option<bool>,
}

/// What the object looked like when its bundle was last switched
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BeforeUpgradeNode {
    pub state: Option<String>,
    pub config: Value,
}

/// Service node with its components keyed by prototype name
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceNode {
    #[serde(flatten)]
    pub node: ObjectNode,
    #[serde(flatten)]
    pub components: BTreeMap<String, ObjectNode>,
}

/// Variables of one host inside a group
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostVars {
    pub adcm_hostid: u64,
    pub state: String,
    pub multi_state: Vec<String>,
    pub maintenance_mode: bool,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub config: Value,
    /// Per-host alternatives of `cluster`, `services` or `provider`
    #[serde(flatten)]
    pub overrides: BTreeMap<String, Value>,
}

impl Inventory {
    pub fn group(&self, name: &str) -> Option<&InventoryGroup> {
        self.all.children.get(name)
    }

    /// Fqdns of a group; empty when the group is absent
    pub fn hosts_of(&self, name: &str) -> Vec<&str> {
        self.group(name)
            .map(|g| g.hosts.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
