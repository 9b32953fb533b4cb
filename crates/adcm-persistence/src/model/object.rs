//! Clusters, services, components, providers and hosts

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use adcm_common::DEFAULT_STATE;
use serde::{Deserialize, Serialize};

use super::ids::{
    BundleId, ClusterId, ComponentId, ConfigHostGroupId, ConfigLogId, HostId, ObjectConfigId,
    PrototypeId, ProviderId, ServiceId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Cluster,
    Service,
    Component,
    Provider,
    Host,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Cluster => "cluster",
            ObjectKind::Service => "service",
            ObjectKind::Component => "component",
            ObjectKind::Provider => "provider",
            ObjectKind::Host => "host",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged reference to any core object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ObjectRef {
    Cluster(ClusterId),
    Service(ServiceId),
    Component(ComponentId),
    Provider(ProviderId),
    Host(HostId),
}

impl ObjectRef {
    pub fn kind(self) -> ObjectKind {
        match self {
            ObjectRef::Cluster(_) => ObjectKind::Cluster,
            ObjectRef::Service(_) => ObjectKind::Service,
            ObjectRef::Component(_) => ObjectKind::Component,
            ObjectRef::Provider(_) => ObjectKind::Provider,
            ObjectRef::Host(_) => ObjectKind::Host,
        }
    }

    pub fn id(self) -> u64 {
        match self {
            ObjectRef::Cluster(id) => id.0,
            ObjectRef::Service(id) => id.0,
            ObjectRef::Component(id) => id.0,
            ObjectRef::Provider(id) => id.0,
            ObjectRef::Host(id) => id.0,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

impl From<ClusterId> for ObjectRef {
    fn from(value: ClusterId) -> Self {
        ObjectRef::Cluster(value)
    }
}

impl From<ServiceId> for ObjectRef {
    fn from(value: ServiceId) -> Self {
        ObjectRef::Service(value)
    }
}

impl From<ComponentId> for ObjectRef {
    fn from(value: ComponentId) -> Self {
        ObjectRef::Component(value)
    }
}

impl From<ProviderId> for ObjectRef {
    fn from(value: ProviderId) -> Self {
        ObjectRef::Provider(value)
    }
}

impl From<HostId> for ObjectRef {
    fn from(value: HostId) -> Self {
        ObjectRef::Host(value)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceMode {
    On,
    #[default]
    Off,
    Changing,
}

impl MaintenanceMode {
    pub fn is_on(self) -> bool {
        self == MaintenanceMode::On
    }
}

impl fmt::Display for MaintenanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MaintenanceMode::On => "on",
            MaintenanceMode::Off => "off",
            MaintenanceMode::Changing => "changing",
        })
    }
}

/// Snapshot recorded when an upgrade switches the object's bundle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeforeUpgrade {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub bundle_id: Option<BundleId>,
    #[serde(default)]
    pub prototype_id: Option<PrototypeId>,
    #[serde(default)]
    pub config_log: Option<ConfigLogId>,
    /// Current revision of every config host group owned by the object
    #[serde(default)]
    pub groups: BTreeMap<ConfigHostGroupId, ConfigLogId>,
}

impl BeforeUpgrade {
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.bundle_id.is_none()
            && self.prototype_id.is_none()
            && self.config_log.is_none()
            && self.groups.is_empty()
    }
}

/// Fields every object carries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCommon {
    pub prototype_id: PrototypeId,
    pub state: String,
    #[serde(default)]
    pub multi_state: BTreeSet<String>,
    #[serde(default)]
    pub config_id: Option<ObjectConfigId>,
    #[serde(default)]
    pub before_upgrade: BeforeUpgrade,
}

impl ObjectCommon {
    pub fn new(prototype_id: PrototypeId, config_id: Option<ObjectConfigId>) -> Self {
        Self {
            prototype_id,
            state: DEFAULT_STATE.to_string(),
            multi_state: BTreeSet::new(),
            config_id,
            before_upgrade: BeforeUpgrade::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub common: ObjectCommon,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub cluster_id: ClusterId,
    #[serde(flatten)]
    pub common: ObjectCommon,
    #[serde(default)]
    pub maintenance_mode: MaintenanceMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub cluster_id: ClusterId,
    pub service_id: ServiceId,
    #[serde(flatten)]
    pub common: ObjectCommon,
    #[serde(default)]
    pub maintenance_mode: MaintenanceMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub common: ObjectCommon,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub fqdn: String,
    #[serde(default)]
    pub description: String,
    pub provider_id: ProviderId,
    #[serde(default)]
    pub cluster_id: Option<ClusterId>,
    #[serde(flatten)]
    pub common: ObjectCommon,
    #[serde(default)]
    pub maintenance_mode: MaintenanceMode,
}

/// Uniform access to the attributes shared by every object
pub trait CoreObject: Send + Sync {
    fn object_ref(&self) -> ObjectRef;

    fn common(&self) -> &ObjectCommon;

    fn common_mut(&mut self) -> &mut ObjectCommon;

    /// `None` for objects without a maintenance mode flag
    fn maintenance_mode(&self) -> Option<MaintenanceMode> {
        None
    }

    /// Returns false when the object has no maintenance mode flag
    fn set_maintenance_mode(&mut self, _value: MaintenanceMode) -> bool {
        false
    }

    fn prototype_id(&self) -> PrototypeId {
        self.common().prototype_id
    }

    fn state(&self) -> &str {
        &self.common().state
    }

    fn multi_state(&self) -> &BTreeSet<String> {
        &self.common().multi_state
    }

    fn config_id(&self) -> Option<ObjectConfigId> {
        self.common().config_id
    }
}

impl CoreObject for Cluster {
    fn object_ref(&self) -> ObjectRef {
        ObjectRef::Cluster(self.id)
    }

    fn common(&self) -> &ObjectCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ObjectCommon {
        &mut self.common
    }
}

impl CoreObject for Provider {
    fn object_ref(&self) -> ObjectRef {
        ObjectRef::Provider(self.id)
    }

    fn common(&self) -> &ObjectCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ObjectCommon {
        &mut self.common
    }
}

macro_rules! impl_with_maintenance_mode {
    ($ty:ident, $variant:ident) => {
        impl CoreObject for $ty {
            fn object_ref(&self) -> ObjectRef {
                ObjectRef::$variant(self.id)
            }

            fn common(&self) -> &ObjectCommon {
                &self.common
            }

            fn common_mut(&mut self) -> &mut ObjectCommon {
                &mut self.common
            }

            fn maintenance_mode(&self) -> Option<MaintenanceMode> {
                Some(self.maintenance_mode)
            }

            fn set_maintenance_mode(&mut self, value: MaintenanceMode) -> bool {
                self.maintenance_mode = value;
                true
            }
        }
    };
}

impl_with_maintenance_mode!(Service, Service);
impl_with_maintenance_mode!(Component, Component);
impl_with_maintenance_mode!(Host, Host);
