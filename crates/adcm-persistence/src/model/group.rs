//! Host groups: config overrides and action scoping

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ids::{ActionHostGroupId, ConfigHostGroupId, HostId, ObjectConfigId};
use super::object::ObjectRef;

/// Hosts of one owner whose desynchronised parameters override the owner's config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigHostGroup {
    pub id: ConfigHostGroupId,
    pub owner: ObjectRef,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hosts: BTreeSet<HostId>,
    pub config_id: ObjectConfigId,
}

/// Named subset of mapped hosts an action can be launched on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionHostGroup {
    pub id: ActionHostGroupId,
    pub owner: ObjectRef,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hosts: BTreeSet<HostId>,
}
